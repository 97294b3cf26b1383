//! Controller state-machine scenarios against a fake SDR device.

use std::{
    f64::consts::TAU,
    sync::Arc,
    time::Duration,
};

use airwave_radio::{
    AudioSink,
    Radio,
    RadioError,
    SdrBackend,
    SdrProvider,
    controller::SAMPLE_RATE,
};
use parking_lot::Mutex;
use tokio::time::{
    sleep,
    timeout,
};

#[derive(Default)]
struct FakeDeviceState {
    open_calls: usize,
    close_calls: usize,
    set_frequency_calls: Vec<u32>,
    reset_calls: usize,
    center: u32,
    /// A single station on the air: frequency and carrier amplitude.
    station: Option<(u32, f64)>,
    phase: f64,
    fail_reads: bool,
}

#[derive(Clone)]
struct FakeSdr {
    state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeSdr {
    fn read_delay() -> Duration {
        Duration::from_millis(2)
    }
}

impl SdrBackend for FakeSdr {
    async fn open(&mut self) -> Result<(), RadioError> {
        self.state.lock().open_calls += 1;
        Ok(())
    }

    async fn set_sample_rate(&mut self, rate: u32) -> Result<u32, RadioError> {
        Ok(rate)
    }

    async fn set_center_frequency(&mut self, frequency: u32) -> Result<u32, RadioError> {
        let mut state = self.state.lock();
        state.set_frequency_calls.push(frequency);
        state.center = frequency;
        Ok(frequency)
    }

    async fn reset_buffer(&self) -> Result<(), RadioError> {
        self.state.lock().reset_calls += 1;
        Ok(())
    }

    async fn read_samples(&self, length: usize) -> Result<Vec<u8>, RadioError> {
        sleep(Self::read_delay()).await;
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(RadioError::Transport(
                airwave_rtlsdr::TransportError::new("bulk_read", 0, 0, "fake failure"),
            ));
        }
        let mut bytes = Vec::with_capacity(2 * length);
        match state.station {
            Some((station_freq, amplitude)) => {
                // an unmodulated carrier at the station's offset from
                // the tuned center
                let offset = f64::from(station_freq) - f64::from(state.center);
                let step = TAU * offset / f64::from(SAMPLE_RATE);
                let mut phase = state.phase;
                for _ in 0..length {
                    bytes.push((127.5 + 127.0 * amplitude * phase.cos()).round() as u8);
                    bytes.push((127.5 + 127.0 * amplitude * phase.sin()).round() as u8);
                    phase += step;
                }
                state.phase = phase % TAU;
            }
            None => bytes.resize(2 * length, 127),
        }
        Ok(bytes)
    }

    async fn close(&mut self) -> Result<(), RadioError> {
        self.state.lock().close_calls += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FakeProvider {
    state: Arc<Mutex<FakeDeviceState>>,
}

impl SdrProvider for FakeProvider {
    type Backend = FakeSdr;

    async fn acquire(&mut self, _ppm: i32, _gain: Option<f32>) -> Result<FakeSdr, RadioError> {
        Ok(FakeSdr {
            state: self.state.clone(),
        })
    }
}

/// Provider with nothing plugged in.
struct EmptyProvider;

impl SdrProvider for EmptyProvider {
    type Backend = FakeSdr;

    async fn acquire(&mut self, _ppm: i32, _gain: Option<f32>) -> Result<FakeSdr, RadioError> {
        Err(RadioError::DeviceNotFound)
    }
}

#[derive(Clone, Default)]
struct CountingSink {
    blocks: Arc<Mutex<usize>>,
}

impl AudioSink for CountingSink {
    fn play(&mut self, interleaved: &[f32]) {
        assert!(interleaved.len() % 2 == 0);
        *self.blocks.lock() += 1;
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn start_reaches_playing_and_stop_returns_to_off() {
    let provider = FakeProvider::default();
    let state = provider.state.clone();
    let sink = CountingSink::default();
    let blocks = sink.blocks.clone();
    let radio = Radio::new(provider, sink);
    radio.set_on_error(|_| {}).await.unwrap();

    timeout(Duration::from_millis(200), radio.start())
        .await
        .expect("start took more than 200 ms")
        .unwrap();
    assert!(radio.is_playing());

    wait_for(|| *blocks.lock() > 3, "audio blocks").await;

    radio.stop().await.unwrap();
    assert!(!radio.is_playing());
    let state = state.lock();
    assert_eq!(state.open_calls, 1);
    assert_eq!(state.close_calls, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn small_retune_does_not_touch_the_tuner() {
    let provider = FakeProvider::default();
    let state = provider.state.clone();
    let radio = Radio::new(provider, CountingSink::default());
    radio.set_on_error(|_| {}).await.unwrap();
    radio.set_frequency(88_500_000).await.unwrap();
    radio.start().await.unwrap();

    let tuner_calls = state.lock().set_frequency_calls.len();
    let resets = state.lock().reset_calls;
    radio.set_frequency(88_700_000).await.unwrap();
    wait_for(
        || radio.is_playing() && radio.get_frequency() == 88_700_000,
        "retune to settle",
    )
    .await;
    sleep(Duration::from_millis(50)).await;

    let state = state.lock();
    assert_eq!(state.set_frequency_calls.len(), tuner_calls);
    assert_eq!(state.reset_calls, resets);
}

#[tokio::test(flavor = "multi_thread")]
async fn large_retune_touches_the_tuner_exactly_once() {
    let provider = FakeProvider::default();
    let state = provider.state.clone();
    let radio = Radio::new(provider, CountingSink::default());
    radio.set_on_error(|_| {}).await.unwrap();
    radio.set_frequency(88_500_000).await.unwrap();
    radio.start().await.unwrap();

    let tuner_calls = state.lock().set_frequency_calls.len();
    let resets = state.lock().reset_calls;
    radio.set_frequency(100_100_000).await.unwrap();
    wait_for(
        || radio.is_playing() && radio.get_frequency() == 100_100_000,
        "retune to settle",
    )
    .await;
    sleep(Duration::from_millis(50)).await;

    let state = state.lock();
    assert_eq!(state.set_frequency_calls.len(), tuner_calls + 1);
    assert_eq!(*state.set_frequency_calls.last().unwrap(), 100_100_000);
    assert_eq!(state.reset_calls, resets + 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_stops_on_the_station() {
    let provider = FakeProvider::default();
    provider.state.lock().station = Some((95_100_000, 0.45));
    let radio = Radio::new(provider, CountingSink::default());
    radio.set_on_error(|_| {}).await.unwrap();
    radio.set_frequency(94_500_000).await.unwrap();
    radio.start().await.unwrap();

    radio.scan(88_000_000, 108_000_000, 100_000).await.unwrap();
    wait_for(|| radio.is_scanning(), "scan to begin").await;
    wait_for(
        || !radio.is_scanning() && radio.is_playing(),
        "scan to finish",
    )
    .await;
    assert_eq!(radio.get_frequency(), 95_100_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn in_flight_budget_is_never_exceeded() {
    let provider = FakeProvider::default();
    let radio = Radio::new(provider, CountingSink::default());
    radio.set_on_error(|_| {}).await.unwrap();
    radio.start().await.unwrap();

    for _ in 0..200 {
        let (requesting, playing) = radio.buffer_stats();
        assert!(requesting <= 2, "requesting_blocks = {requesting}");
        assert!(playing <= 2, "playing_blocks = {playing}");
        sleep(Duration::from_millis(2)).await;
    }
    radio.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn read_errors_reach_the_handler_and_stop_the_radio() {
    let provider = FakeProvider::default();
    let state = provider.state.clone();
    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen = errors.clone();
    let radio = Radio::new(provider, CountingSink::default());
    radio
        .set_on_error(move |error| seen.lock().push(error.to_string()))
        .await
        .unwrap();
    radio.start().await.unwrap();

    state.lock().fail_reads = true;
    wait_for(|| !errors.lock().is_empty(), "the error handler").await;
    wait_for(|| !radio.is_playing(), "the radio to stop").await;
    wait_for(|| state.lock().close_calls == 1, "the device to close").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn start_without_a_device_fails() {
    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen = errors.clone();
    let radio = Radio::new(EmptyProvider, CountingSink::default());
    radio
        .set_on_error(move |error| seen.lock().push(error.to_string()))
        .await
        .unwrap();

    match radio.start().await {
        Err(RadioError::DeviceNotFound) => {}
        other => panic!("expected DeviceNotFound, got {other:?}"),
    }
    assert!(!radio.is_playing());
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn squelch_mutes_weak_audio() {
    let provider = FakeProvider::default();
    let loudest: Arc<Mutex<f32>> = Arc::default();
    let seen = loudest.clone();
    let sink = move |interleaved: &[f32]| {
        let peak = interleaved.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
        let mut loudest = seen.lock();
        if peak > *loudest {
            *loudest = peak;
        }
    };
    let radio = Radio::new(provider, sink);
    radio.set_on_error(|_| {}).await.unwrap();
    // no station on the air: squelch far above the noise floor mutes
    // everything
    radio.set_squelch(0.4).await.unwrap();
    radio.start().await.unwrap();
    sleep(Duration::from_millis(300)).await;
    radio.stop().await.unwrap();
    assert_eq!(*loudest.lock(), 0.0);
}

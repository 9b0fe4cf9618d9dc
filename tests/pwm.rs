#![allow(missing_docs)]
//! Software PWM behavior against the simulated register block.
//!
//! Timing assertions are statistical and deliberately loose: sleeps only
//! ever overshoot, and CI machines are noisy.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rpi_gpio::{
    BoardRevision, Direction, Error, Gpio, Level, NumberingMode, Pull, Registers, Simulated,
};

fn simulated_context() -> (Arc<Simulated>, Gpio) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sim = Arc::new(Simulated::new());
    let gpio = Gpio::builder()
        .registers(Arc::clone(&sim) as Arc<dyn Registers>)
        .revision(BoardRevision::Rev3Plus)
        .open()
        .expect("open simulated context");
    gpio.set_mode(NumberingMode::Bcm).expect("set mode");
    (sim, gpio)
}

fn output_channel(gpio: &Gpio, channel: u32) {
    gpio.setup(channel, Direction::Output, Pull::Off, Some(Level::Low))
        .expect("setup output");
}

#[test]
fn phase_durations_track_frequency_and_duty_cycle() {
    let (sim, gpio) = simulated_context();
    output_channel(&gpio, 18);

    let pwm = gpio.pwm(18, 50.0).expect("bind pwm");
    sim.start_recording();
    pwm.start(25.0).expect("start");
    thread::sleep(Duration::from_millis(400));
    pwm.stop().expect("stop");

    let events = sim.take_events();
    let transitions: Vec<_> = events
        .iter()
        .filter(|&&(_, g, _)| g == 18)
        .collect();
    assert!(transitions.len() >= 6, "expected several cycles, got {transitions:?}");

    // Collect high-phase and low-phase durations from consecutive edges.
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for pair in transitions.windows(2) {
        let (start, _, level) = *pair[0];
        let (end, _, _) = *pair[1];
        match level {
            Level::High => highs.push(end - start),
            Level::Low => lows.push(end - start),
        }
    }
    let mean = |durations: &[Duration]| {
        durations.iter().sum::<Duration>() / durations.len() as u32
    };
    // Targets: 5 ms high, 15 ms low. Sleeps overshoot, never undershoot.
    let mean_high = mean(&highs);
    let mean_low = mean(&lows);
    assert!(
        mean_high >= Duration::from_millis(4) && mean_high <= Duration::from_millis(12),
        "mean high phase {mean_high:?}"
    );
    assert!(
        mean_low >= Duration::from_millis(13) && mean_low <= Duration::from_millis(30),
        "mean low phase {mean_low:?}"
    );
    assert!(mean_high < mean_low);
}

#[test]
fn stop_leaves_the_line_low_and_frees_the_channel() {
    let (sim, gpio) = simulated_context();
    output_channel(&gpio, 12);

    let pwm = gpio.pwm(12, 100.0).expect("bind pwm");
    pwm.start(100.0).expect("start");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sim.read_level(12), Level::High);

    pwm.stop().expect("stop");
    assert_eq!(sim.read_level(12), Level::Low);

    // The channel is immediately free for a fresh task.
    let second = gpio.pwm(12, 100.0).expect("rebind");
    second.start(0.0).expect("start");
    second.stop().expect("stop");
}

#[test]
fn stopped_tasks_are_terminal() {
    let (_, gpio) = simulated_context();
    output_channel(&gpio, 13);

    let pwm = gpio.pwm(13, 100.0).expect("bind pwm");
    pwm.start(50.0).expect("start");
    pwm.stop().expect("stop");
    pwm.stop().expect("stop is idempotent");

    assert!(matches!(pwm.start(50.0), Err(Error::PwmStopped)));
    assert!(matches!(pwm.change_duty_cycle(10.0), Err(Error::PwmStopped)));
    assert!(matches!(pwm.change_frequency(10.0), Err(Error::PwmStopped)));
}

#[test]
fn parameters_are_validated() {
    let (_, gpio) = simulated_context();
    output_channel(&gpio, 19);

    assert!(matches!(
        gpio.pwm(19, 0.0),
        Err(Error::FrequencyNotPositive { .. })
    ));
    assert!(matches!(
        gpio.pwm(19, -5.0),
        Err(Error::FrequencyNotPositive { .. })
    ));

    let pwm = gpio.pwm(19, 100.0).expect("bind pwm");
    assert!(matches!(
        pwm.start(-1.0),
        Err(Error::InvalidDutyCycle { .. })
    ));
    assert!(matches!(
        pwm.start(100.5),
        Err(Error::InvalidDutyCycle { .. })
    ));
    pwm.start(0.0).expect("0% is valid");
    assert!(matches!(
        pwm.change_duty_cycle(101.0),
        Err(Error::InvalidDutyCycle { .. })
    ));
    assert!(matches!(
        pwm.change_frequency(0.0),
        Err(Error::FrequencyNotPositive { .. })
    ));
}

#[test]
fn binding_requires_an_output_channel() {
    let (_, gpio) = simulated_context();

    // Unconfigured channel.
    assert!(matches!(
        gpio.pwm(16, 100.0),
        Err(Error::DirectionMismatch { gpio: 16 })
    ));

    // Input channel.
    gpio.setup(16, Direction::Input, Pull::Off, None).expect("setup");
    assert!(matches!(
        gpio.pwm(16, 100.0),
        Err(Error::DirectionMismatch { gpio: 16 })
    ));
}

#[test]
fn a_channel_carries_at_most_one_task() {
    let (_, gpio) = simulated_context();
    output_channel(&gpio, 20);

    let pwm = gpio.pwm(20, 100.0).expect("bind pwm");
    assert!(matches!(
        gpio.pwm(20, 200.0),
        Err(Error::PwmAlreadyBound { gpio: 20 })
    ));

    // Reconfiguring the direction under a live task is refused too.
    assert!(matches!(
        gpio.setup(20, Direction::Input, Pull::Off, None),
        Err(Error::PwmAlreadyBound { gpio: 20 })
    ));

    pwm.stop().expect("stop");
    gpio.setup(20, Direction::Input, Pull::Off, None)
        .expect("reconfigure after stop");
}

#[test]
fn degenerate_duty_cycles_hold_the_line_steady() {
    let (sim, gpio) = simulated_context();
    output_channel(&gpio, 21);

    let pwm = gpio.pwm(21, 50.0).expect("bind pwm");
    pwm.start(0.0).expect("start at 0%");
    thread::sleep(Duration::from_millis(80));
    assert_eq!(sim.read_level(21), Level::Low);

    // The new duty cycle is picked up within one period.
    pwm.change_duty_cycle(100.0).expect("retune");
    thread::sleep(Duration::from_millis(150));
    assert_eq!(sim.read_level(21), Level::High);

    pwm.stop().expect("stop");
    assert_eq!(sim.read_level(21), Level::Low);
}

#[test]
fn dropping_the_handle_stops_the_task() {
    let (sim, gpio) = simulated_context();
    output_channel(&gpio, 26);

    {
        let pwm = gpio.pwm(26, 100.0).expect("bind pwm");
        pwm.start(100.0).expect("start");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sim.read_level(26), Level::High);
    }
    // Handle dropped: worker joined, line low, binding free.
    assert_eq!(sim.read_level(26), Level::Low);
    gpio.pwm(26, 100.0).expect("rebind after drop");
}

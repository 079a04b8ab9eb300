//! PID micro-benchmark: throughput of one `pid_compute` evaluation, the
//! hot path run twice per axis per tick (position loop then velocity
//! loop).

use criterion::{criterion_group, criterion_main, Criterion};

use hangcnc_control::control::pid::{pid_compute, Direction, Mode, PidGains, PidState};

fn reference_gains() -> PidGains {
    PidGains {
        kp: 5.0,
        ki: 0.0,
        kd: 0.0,
        p_on: 1.0,
        out_min: -20.0,
        out_max: 20.0,
        direction: Direction::Reverse,
        sample_time_s: 0.01,
    }
}

fn bench_pid_compute(c: &mut Criterion) {
    let gains = reference_gains();
    let mut state = PidState::default();
    state.set_mode(Mode::Auto, 0.0, 0.0, &gains);

    c.bench_function("pid_compute", |b| {
        let mut setpoint = 0.0;
        b.iter(|| {
            setpoint += 0.001;
            pid_compute(&mut state, &gains, setpoint, 0.0)
        });
    });
}

criterion_group!(benches, bench_pid_compute);
criterion_main!(benches);

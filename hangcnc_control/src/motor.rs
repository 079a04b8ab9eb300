//! H-bridge motor driver abstraction (C2).
//!
//! Grounded in `Motor.cpp`: the same `write(speed, force)` / `additiveWrite`
//! / `attach` / `detach` surface, the same [-255,255] clamp, and the same
//! pin-collision-avoidance rule translated to an abstract signal-path
//! choice instead of literal AVR timer/pin numbers.

/// Output commanded to the bridge hardware for one `write`, expressed in
/// abstraction terms rather than raw pin levels — a platform driver turns
/// this into actual GPIO/PWM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    /// Coast: both direction outputs released, no PWM.
    Coast,
    /// Brake-capable bridges (TLE5206-style) pull both direction lines low.
    Brake,
    /// Drive forward/reverse with the given PWM duty on `channel`,
    /// 0..=255.
    Drive { forward: bool, duty: u8, channel: PwmChannel },
}

/// Which of the bridge's three signal paths carries the PWM duty this
/// command. Standard bridges prefer the dedicated PWM pin; if that pin
/// collides with the tick timer, duty moves to whichever direction pin
/// doesn't, mirroring `Motor::write`'s `usePinN` pin-avoidance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmChannel {
    Dedicated,
    Dir1,
    Dir2,
}

/// Two physical bridge topologies, per `Motor.h`'s `TLE5206` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeVariant {
    /// One PWM pin plus two direction pins.
    Standard,
    /// Two PWM-capable direction pins; zero-speed brakes instead of coasts.
    Tle5206,
}

/// Reports whether a signal path collides with the tick timer, so the
/// bridge can choose an alternate path. Platform code implements this;
/// tests use a fake that always returns `false`.
pub trait TimerConflict {
    fn conflicts_with_tick_timer(&self, channel: PwmChannel) -> bool;
}

/// A bridge driver that never reports a conflict — the common case once a
/// board's pin map has been chosen so the tick timer is free.
pub struct NoConflict;

impl TimerConflict for NoConflict {
    fn conflicts_with_tick_timer(&self, _channel: PwmChannel) -> bool {
        false
    }
}

/// A signed PWM motor output. Owns no actual GPIO; callers apply the
/// returned [`DriveCommand`] to hardware.
#[derive(Debug, Clone, Copy)]
pub struct Motor {
    variant: BridgeVariant,
    attached: bool,
    last_speed: i16,
}

impl Motor {
    pub fn new(variant: BridgeVariant) -> Self {
        Motor { variant, attached: false, last_speed: 0 }
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    pub fn detach(&mut self) {
        self.attached = false;
    }

    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn last_speed(&self) -> i16 {
        self.last_speed
    }

    /// Commands a new speed in [-255,255]. A no-op unless attached or
    /// `force` is set, mirroring `Motor::write`.
    pub fn write(&mut self, speed: i16, force: bool, conflict: &impl TimerConflict) -> DriveCommand {
        if !self.attached && !force {
            return match self.variant {
                BridgeVariant::Standard => DriveCommand::Coast,
                BridgeVariant::Tle5206 => DriveCommand::Brake,
            };
        }

        let speed = speed.clamp(-255, 255);
        self.last_speed = speed;

        if speed == 0 {
            return match self.variant {
                BridgeVariant::Standard => DriveCommand::Coast,
                BridgeVariant::Tle5206 => DriveCommand::Brake,
            };
        }

        let forward = speed > 0;
        let duty = speed.unsigned_abs() as u8;
        let channel = self.choose_channel(conflict);
        DriveCommand::Drive { forward, duty, channel }
    }

    /// Bypasses the attached-state check, mirroring `Motor::directWrite`.
    pub fn direct_write(&mut self, speed: i16, conflict: &impl TimerConflict) -> DriveCommand {
        self.write(speed, true, conflict)
    }

    /// Adds `delta` onto the last commanded speed and re-applies it — the
    /// velocity loop's "additive write" (C4), mirroring
    /// `Motor::additiveWrite`.
    pub fn additive_write(&mut self, delta: i16, conflict: &impl TimerConflict) -> DriveCommand {
        let target = (self.last_speed as i32 + delta as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        self.write(target, false, conflict)
    }

    fn choose_channel(&self, conflict: &impl TimerConflict) -> PwmChannel {
        match self.variant {
            BridgeVariant::Standard => {
                if !conflict.conflicts_with_tick_timer(PwmChannel::Dedicated) {
                    PwmChannel::Dedicated
                } else if !conflict.conflicts_with_tick_timer(PwmChannel::Dir2) {
                    PwmChannel::Dir2
                } else {
                    PwmChannel::Dir1
                }
            }
            BridgeVariant::Tle5206 => {
                if !conflict.conflicts_with_tick_timer(PwmChannel::Dir1) {
                    PwmChannel::Dir1
                } else {
                    PwmChannel::Dir2
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysConflicts(PwmChannel);
    impl TimerConflict for AlwaysConflicts {
        fn conflicts_with_tick_timer(&self, channel: PwmChannel) -> bool {
            channel == self.0
        }
    }

    #[test]
    fn detached_write_is_noop_without_force() {
        let mut m = Motor::new(BridgeVariant::Standard);
        let cmd = m.write(200, false, &NoConflict);
        assert_eq!(cmd, DriveCommand::Coast);
        assert_eq!(m.last_speed(), 0);
    }

    #[test]
    fn forced_write_applies_even_when_detached() {
        let mut m = Motor::new(BridgeVariant::Standard);
        let cmd = m.write(100, true, &NoConflict);
        assert_eq!(cmd, DriveCommand::Drive { forward: true, duty: 100, channel: PwmChannel::Dedicated });
    }

    #[test]
    fn speed_clamps_to_255() {
        let mut m = Motor::new(BridgeVariant::Standard);
        m.attach();
        let cmd = m.write(9000, false, &NoConflict);
        assert_eq!(cmd, DriveCommand::Drive { forward: true, duty: 255, channel: PwmChannel::Dedicated });
    }

    #[test]
    fn zero_speed_coasts_on_standard_bridge() {
        let mut m = Motor::new(BridgeVariant::Standard);
        m.attach();
        assert_eq!(m.write(0, false, &NoConflict), DriveCommand::Coast);
    }

    #[test]
    fn zero_speed_brakes_on_tle5206() {
        let mut m = Motor::new(BridgeVariant::Tle5206);
        m.attach();
        assert_eq!(m.write(0, false, &NoConflict), DriveCommand::Brake);
    }

    #[test]
    fn additive_write_accumulates_onto_last_speed() {
        let mut m = Motor::new(BridgeVariant::Standard);
        m.attach();
        m.write(50, false, &NoConflict);
        let cmd = m.additive_write(20, &NoConflict);
        assert_eq!(cmd, DriveCommand::Drive { forward: true, duty: 70, channel: PwmChannel::Dedicated });
    }

    #[test]
    fn pwm_channel_moves_off_a_conflicting_dedicated_pin() {
        let mut m = Motor::new(BridgeVariant::Standard);
        m.attach();
        let cmd = m.write(80, false, &AlwaysConflicts(PwmChannel::Dedicated));
        assert_eq!(cmd, DriveCommand::Drive { forward: true, duty: 80, channel: PwmChannel::Dir2 });
    }

    #[test]
    fn detach_does_not_clear_last_speed_but_blocks_writes() {
        let mut m = Motor::new(BridgeVariant::Standard);
        m.attach();
        m.write(60, false, &NoConflict);
        m.detach();
        assert_eq!(m.write(10, false, &NoConflict), DriveCommand::Coast);
        assert_eq!(m.last_speed(), 60);
    }
}

//! Yaesu GS-232B rotator controller dialect.
//!
//! Commands end with CR, replies with CR LF. A reply starting with `?` means
//! the controller did not understand the command.

use std::fmt;

use tracing::{debug, instrument};

use super::{Dialect, DialectError};
use crate::protocol::Reply;
use crate::transaction::{Channel, TransactionError, TransactionSettings, Transactor};

pub const EOM: &[u8] = b"\r";
pub const REPLY_EOM: &[u8] = b"\r\n";

pub const MIN_AZIMUTH: f64 = 0.0;
pub const MAX_AZIMUTH: f64 = 450.0;
pub const MIN_ELEVATION: f64 = 0.0;
pub const MAX_ELEVATION: f64 = 180.0;

pub const TIMEOUT_MS: u64 = 400;
pub const RETRIES: u32 = 3;
pub const REPLY_CAPACITY: usize = 64;

// Shortest raw position reply, terminator included
const MIN_POSITION_REPLY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    /// Elevation increase.
    Up,
    /// Elevation decrease.
    Down,
    /// Azimuth decrease.
    Left,
    /// Azimuth increase.
    Right,
}

impl MoveDirection {
    fn letter(self) -> char {
        match self {
            MoveDirection::Up => 'U',
            MoveDirection::Down => 'D',
            MoveDirection::Left => 'L',
            MoveDirection::Right => 'R',
        }
    }
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveDirection::Up => write!(f, "Up"),
            MoveDirection::Down => write!(f, "Down"),
            MoveDirection::Left => write!(f, "Left"),
            MoveDirection::Right => write!(f, "Right"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gs232bCommand {
    SetPosition { azimuth: f64, elevation: f64 },
    GetPosition,
    Stop,
    /// Rotation speed step, 1 (slowest) to 4 (fastest).
    SetSpeed(u8),
    Move(MoveDirection),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gs232bResponse {
    Ack,
    Position { azimuth: f64, elevation: f64 },
}

/// GS-232B command set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gs232b;

fn check_range(what: &'static str, value: f64, min: f64, max: f64) -> Result<(), DialectError> {
    if value.is_nan() || value < min || value > max {
        return Err(DialectError::OutOfRange {
            what,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Map a 0..=100 speed percentage to the controller's 1..=4 steps.
pub fn speed_step(speed: u8) -> Result<u8, DialectError> {
    check_range("speed", speed as f64, 0.0, 100.0)?;
    Ok((3 * speed as u32 / 100 + 1) as u8)
}

/// Parse `AZ=<n> EL=<n>`; any amount of whitespace (including none) may
/// separate the two fields.
pub fn parse_position(text: &str) -> Option<(i32, i32)> {
    let rest = text.trim_start().strip_prefix("AZ=")?;
    let (azimuth, rest) = take_int(rest)?;
    let rest = rest.trim_start().strip_prefix("EL=")?;
    let (elevation, _) = take_int(rest)?;
    Some((azimuth, elevation))
}

fn take_int(s: &str) -> Option<(i32, &str)> {
    let s = s.trim_start();
    let sign_len = usize::from(s.starts_with(['+', '-']));
    let digits = s[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len() - sign_len);
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

impl Dialect for Gs232b {
    type Command = Gs232bCommand;
    type Response = Gs232bResponse;

    fn delimiter(&self) -> &[u8] {
        REPLY_EOM
    }

    fn encode(&self, command: &Gs232bCommand) -> Result<Vec<u8>, DialectError> {
        let text = match *command {
            Gs232bCommand::SetPosition {
                azimuth,
                elevation,
            } => {
                check_range("azimuth", azimuth, MIN_AZIMUTH, MAX_AZIMUTH)?;
                check_range("elevation", elevation, MIN_ELEVATION, MAX_ELEVATION)?;
                format!(
                    "W{:03} {:03}",
                    azimuth.round() as u32,
                    elevation.round() as u32
                )
            }
            Gs232bCommand::GetPosition => "C2".to_string(),
            Gs232bCommand::Stop => "S".to_string(),
            Gs232bCommand::SetSpeed(step) => {
                check_range("speed step", step as f64, 1.0, 4.0)?;
                format!("X{}", step)
            }
            Gs232bCommand::Move(direction) => direction.letter().to_string(),
        };
        let mut bytes = text.into_bytes();
        bytes.extend_from_slice(EOM);
        Ok(bytes)
    }

    fn decode(&self, command: &Gs232bCommand, reply: &Reply) -> Result<Gs232bResponse, DialectError> {
        match command {
            Gs232bCommand::GetPosition => {
                let text = reply.text(REPLY_EOM);
                let malformed = || DialectError::Malformed {
                    reply: text.clone(),
                    expected: "AZ=aaa EL=eee",
                };
                if reply.len() < MIN_POSITION_REPLY {
                    return Err(malformed());
                }
                let (azimuth, elevation) = parse_position(&text).ok_or_else(malformed)?;
                Ok(Gs232bResponse::Position {
                    azimuth: azimuth as f64,
                    elevation: elevation as f64,
                })
            }
            _ => Ok(Gs232bResponse::Ack),
        }
    }
}

/// GS-232B rotator controller on a channel.
pub struct Gs232bRotator<C: Channel> {
    transactor: Transactor<C, Gs232b>,
}

impl<C: Channel> Gs232bRotator<C> {
    pub fn new(channel: C) -> Self {
        Self::with_settings(
            channel,
            TransactionSettings {
                timeout_ms: TIMEOUT_MS,
                max_retries: RETRIES,
                reply_capacity: REPLY_CAPACITY,
            },
        )
    }

    pub fn with_settings(channel: C, settings: TransactionSettings) -> Self {
        Self {
            transactor: Transactor::new(channel, Gs232b, settings),
        }
    }

    pub fn into_channel(self) -> C {
        self.transactor.into_inner().0
    }

    #[instrument(level = "debug", skip(self))]
    pub fn set_position(&mut self, azimuth: f64, elevation: f64) -> Result<(), TransactionError> {
        self.transactor.execute(&Gs232bCommand::SetPosition {
            azimuth,
            elevation,
        })?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn get_position(&mut self) -> Result<(f64, f64), TransactionError> {
        match self.transactor.execute(&Gs232bCommand::GetPosition)? {
            Gs232bResponse::Position {
                azimuth,
                elevation,
            } => {
                debug!(azimuth, elevation, "Position");
                Ok((azimuth, elevation))
            }
            Gs232bResponse::Ack => Err(TransactionError::Dialect(DialectError::Malformed {
                reply: String::new(),
                expected: "AZ=aaa EL=eee",
            })),
        }
    }

    /// All stop.
    pub fn stop(&mut self) -> Result<(), TransactionError> {
        self.transactor.execute(&Gs232bCommand::Stop)?;
        Ok(())
    }

    /// Start moving in `direction` at `speed` percent (0..=100).
    #[instrument(level = "debug", skip(self))]
    pub fn move_toward(&mut self, direction: MoveDirection, speed: u8) -> Result<(), TransactionError> {
        let step = speed_step(speed)?;
        self.transactor.execute(&Gs232bCommand::SetSpeed(step))?;
        self.transactor.execute(&Gs232bCommand::Move(direction))?;
        Ok(())
    }
}

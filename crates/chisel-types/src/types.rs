use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A block position in the world (x, y, z in whole blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl BlockPos {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A player location in fixed-point units (block coord × 32) plus
/// orientation. The wire protocol carries these values verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPos {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub yaw: u8,
    pub pitch: u8,
}

impl FixedPos {
    pub const ZERO: FixedPos = FixedPos {
        x: 0,
        y: 0,
        z: 0,
        yaw: 0,
        pitch: 0,
    };

    pub fn new(x: i16, y: i16, z: i16, yaw: u8, pitch: u8) -> Self {
        Self { x, y, z, yaw, pitch }
    }

    /// Center a player on a block: X/Z land mid-block, Y gets the
    /// 51-unit eye offset the classic client expects.
    pub fn from_block(x: i16, y: i16, z: i16) -> Self {
        Self {
            x: x * 32 + 16,
            y: y * 32 + 51,
            z: z * 32 + 16,
            yaw: 0,
            pitch: 0,
        }
    }
}

/// The magic byte a CPE-capable client puts in the identification packet.
pub const CPE_MAGIC_BYTE: u8 = 0x42;

/// Classic protocol version implemented by this server.
pub const PROTOCOL_VERSION: u8 = 0x07;

/// The player id a client uses to refer to itself.
pub const SELF_PLAYER_ID: u8 = 0xFF;

/// A CPE extension identity: name plus negotiated version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpeExtension {
    pub name: String,
    pub version: i32,
}

impl CpeExtension {
    pub fn new(name: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for CpeExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

#[derive(Debug, Error)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,
    #[error("username is longer than 16 characters: {0}")]
    TooLong(String),
    #[error("username contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// A normalized (lowercase) username. Display names keep their case;
/// everything keyed by identity uses this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(raw: &str) -> Result<Self, UsernameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UsernameError::Empty);
        }
        if trimmed.len() > 16 {
            return Err(UsernameError::TooLong(trimmed.to_string()));
        }
        let normalized = trimmed.to_ascii_lowercase();
        for c in normalized.chars() {
            if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
                return Err(UsernameError::InvalidCharacter(c));
            }
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Username {
    type Err = UsernameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Username::new(s)
    }
}

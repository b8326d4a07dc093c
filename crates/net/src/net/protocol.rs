use std::str::FromStr;

use glam::Vec3;

pub const TAG_YOU: &str = "U";
pub const TAG_POSITION: &str = "P";
pub const TAG_CHUNK: &str = "C";
pub const TAG_BLOCK: &str = "B";
pub const TAG_DISCONNECT: &str = "D";
pub const TAG_TALK: &str = "T";

/// Player position plus view orientation. All five components take part in
/// change detection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, z: f32, yaw: f32, pitch: f32) -> Self {
        Self {
            position: Vec3::new(x, y, z),
            yaw,
            pitch,
        }
    }

    pub fn distance_squared(&self, other: &Pose) -> f32 {
        let dyaw = self.yaw - other.yaw;
        let dpitch = self.pitch - other.pitch;
        self.position.distance_squared(other.position) + dyaw * dyaw + dpitch * dpitch
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Position(Pose),
    Chunk {
        p: i32,
        q: i32,
    },
    Block {
        p: i32,
        q: i32,
        x: i32,
        y: i32,
        z: i32,
        w: i32,
    },
    Talk(String),
}

impl ClientMessage {
    pub fn encode(&self) -> String {
        match self {
            ClientMessage::Position(pose) => format!("{},{}\n", TAG_POSITION, format_pose(pose)),
            ClientMessage::Chunk { p, q } => format!("{},{},{}\n", TAG_CHUNK, p, q),
            ClientMessage::Block { p, q, x, y, z, w } => {
                format!("{},{},{},{},{},{},{}\n", TAG_BLOCK, p, q, x, y, z, w)
            }
            ClientMessage::Talk(text) => format!("{},{}\n", TAG_TALK, single_line(text)),
        }
    }

    /// Server-side decoding of a line produced by [`ClientMessage::encode`].
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut fields = Fields::of(line)?;
        let tag = fields.tag;

        let message = match tag {
            TAG_POSITION => ClientMessage::Position(fields.pose()?),
            TAG_CHUNK => ClientMessage::Chunk {
                p: fields.next()?,
                q: fields.next()?,
            },
            TAG_BLOCK => ClientMessage::Block {
                p: fields.next()?,
                q: fields.next()?,
                x: fields.next()?,
                y: fields.next()?,
                z: fields.next()?,
                w: fields.next()?,
            },
            TAG_TALK => return Ok(ClientMessage::Talk(fields.rest())),
            tag => return Err(ProtocolError::UnknownTag(tag.to_string())),
        };
        fields.finish()?;
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    You {
        id: u32,
        pose: Pose,
    },
    Position {
        id: u32,
        pose: Pose,
    },
    Block {
        p: i32,
        q: i32,
        x: i32,
        y: i32,
        z: i32,
        w: i32,
    },
    Disconnect {
        id: u32,
    },
    Talk {
        id: u32,
        text: String,
    },
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("'{tag}' message missing field {index}")]
    MissingField { tag: String, index: usize },
    #[error("'{tag}' message field {index} is not a number: {value:?}")]
    InvalidNumber {
        tag: String,
        index: usize,
        value: String,
    },
    #[error("'{tag}' message has {count} trailing fields")]
    TrailingFields { tag: String, count: usize },
    #[error("unknown message tag '{0}'")]
    UnknownTag(String),
    #[error("line is not valid UTF-8 after byte {0}")]
    InvalidUtf8(usize),
}

struct Fields<'a> {
    tag: &'a str,
    parts: std::str::Split<'a, char>,
    index: usize,
}

impl<'a> Fields<'a> {
    fn next<T: FromStr>(&mut self) -> Result<T, ProtocolError> {
        self.index += 1;
        let raw = self.parts.next().ok_or_else(|| ProtocolError::MissingField {
            tag: self.tag.to_string(),
            index: self.index,
        })?;
        raw.trim().parse().map_err(|_| ProtocolError::InvalidNumber {
            tag: self.tag.to_string(),
            index: self.index,
            value: raw.to_string(),
        })
    }

    fn pose(&mut self) -> Result<Pose, ProtocolError> {
        Ok(Pose::new(
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
            self.next()?,
        ))
    }

    fn finish(self) -> Result<(), ProtocolError> {
        let count = self.parts.count();
        if count > 0 {
            return Err(ProtocolError::TrailingFields {
                tag: self.tag.to_string(),
                count,
            });
        }
        Ok(())
    }

    fn of(line: &'a str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut parts = line.split(',');
        let tag = parts.next().unwrap_or_default();
        Ok(Self {
            tag,
            parts,
            index: 0,
        })
    }

    /// Everything after the current field, commas included.
    fn rest(self) -> String {
        self.parts.collect::<Vec<_>>().join(",")
    }
}

fn single_line(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

fn format_pose(pose: &Pose) -> String {
    format!(
        "{:.2},{:.2},{:.2},{:.2},{:.2}",
        pose.position.x, pose.position.y, pose.position.z, pose.yaw, pose.pitch
    )
}

impl ServerMessage {
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::You { id, pose } => {
                format!("{},{},{}\n", TAG_YOU, id, format_pose(pose))
            }
            ServerMessage::Position { id, pose } => {
                format!("{},{},{}\n", TAG_POSITION, id, format_pose(pose))
            }
            ServerMessage::Block { p, q, x, y, z, w } => {
                format!("{},{},{},{},{},{},{}\n", TAG_BLOCK, p, q, x, y, z, w)
            }
            ServerMessage::Disconnect { id } => format!("{},{}\n", TAG_DISCONNECT, id),
            ServerMessage::Talk { id, text } => {
                format!("{},{},{}\n", TAG_TALK, id, single_line(text))
            }
            ServerMessage::Unknown(line) => format!("{}\n", line),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut fields = Fields::of(line)?;
        let tag = fields.tag;

        let message = match tag {
            TAG_YOU => ServerMessage::You {
                id: fields.next()?,
                pose: fields.pose()?,
            },
            TAG_POSITION => ServerMessage::Position {
                id: fields.next()?,
                pose: fields.pose()?,
            },
            TAG_BLOCK => ServerMessage::Block {
                p: fields.next()?,
                q: fields.next()?,
                x: fields.next()?,
                y: fields.next()?,
                z: fields.next()?,
                w: fields.next()?,
            },
            TAG_DISCONNECT => ServerMessage::Disconnect { id: fields.next()? },
            // Chat text may itself contain commas, so only the id is split off.
            TAG_TALK => {
                let id = fields.next()?;
                return Ok(ServerMessage::Talk {
                    id,
                    text: fields.rest(),
                });
            }
            _ => return Ok(ServerMessage::Unknown(line.trim_end_matches('\r').to_string())),
        };
        fields.finish()?;
        Ok(message)
    }
}

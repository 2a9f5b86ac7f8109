//! Control line grammar: `TAG|arg1|arg2`

use crate::error::{Error, Result};
use crate::protocol::DELIMITER;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List { path: String },
    Download { path: String },
    Upload { path: String, size: u64 },
    Delete { path: String },
    Mkdir { path: String },
    Rename { from: String, to: String },
}

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::List { .. } => "LIST",
            Self::Download { .. } => "DOWNLOAD",
            Self::Upload { .. } => "UPLOAD",
            Self::Delete { .. } => "DELETE",
            Self::Mkdir { .. } => "MKDIR",
            Self::Rename { .. } => "RENAME",
        }
    }

    /// Parse one control line. The tag is matched case-insensitively and the
    /// argument count must match the tag exactly.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(Error::request("empty command"));
        }

        let mut fields = line.split(DELIMITER);
        let tag = fields.next().unwrap_or_default().trim().to_ascii_uppercase();
        let args: Vec<&str> = fields.collect();

        let want = match tag.as_str() {
            "LIST" | "DOWNLOAD" | "DELETE" | "MKDIR" => 1,
            "UPLOAD" | "RENAME" => 2,
            _ => return Err(Error::request(format!("unknown command {tag:?}"))),
        };
        if args.len() < want {
            return Err(Error::request(format!("{tag}: missing argument")));
        }
        if args.len() > want {
            return Err(Error::request(format!("{tag}: too many arguments")));
        }

        let path = args[0].to_string();
        Ok(match tag.as_str() {
            "LIST" => Self::List { path },
            "DOWNLOAD" => Self::Download { path },
            "DELETE" => Self::Delete { path },
            "MKDIR" => Self::Mkdir { path },
            "UPLOAD" => {
                let size = args[1]
                    .trim()
                    .parse()
                    .map_err(|_| Error::request(format!("UPLOAD: invalid size {:?}", args[1])))?;
                Self::Upload { path, size }
            }
            _ => Self::Rename {
                from: path,
                to: args[1].to_string(),
            },
        })
    }

    /// Render as a control line, refusing arguments the grammar can't carry.
    pub fn to_line(&self) -> Result<String> {
        let args: Vec<String> = match self {
            Self::List { path }
            | Self::Download { path }
            | Self::Delete { path }
            | Self::Mkdir { path } => vec![path.clone()],
            Self::Upload { path, size } => vec![path.clone(), size.to_string()],
            Self::Rename { from, to } => vec![from.clone(), to.clone()],
        };
        if let Some(bad) = args
            .iter()
            .find(|a| a.contains(DELIMITER) || a.contains(['\r', '\n']))
        {
            return Err(Error::request(format!("argument {bad:?} contains a reserved character")));
        }

        let mut line = self.tag().to_string();
        for arg in &args {
            line.push(DELIMITER);
            line.push_str(arg);
        }
        Ok(line)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List { path }
            | Self::Download { path }
            | Self::Delete { path }
            | Self::Mkdir { path } => write!(f, "{} {path}", self.tag()),
            Self::Upload { path, size } => write!(f, "{} {path} ({size} bytes)", self.tag()),
            Self::Rename { from, to } => write!(f, "{} {from} -> {to}", self.tag()),
        }
    }
}

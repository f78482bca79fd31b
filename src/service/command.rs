//! Command protocol parser
//!
//! One request per line, whitespace-separated, verb case-insensitive:
//!
//! ```text
//! PRESTAMO <code> <site> [userId]
//! DEVOLVER <code> <site>
//! RENOVAR <code> <site>
//! DISPONIBILIDAD? <code>      (also DISPONIBILIDAD)
//! STATUS
//! ```

use thiserror::Error;

use crate::operations::Operation;

pub const LOAN_USAGE: &str = "PRESTAMO <code> <site> [userId]";
pub const RETURN_USAGE: &str = "DEVOLVER <code> <site>";
pub const RENEWAL_USAGE: &str = "RENOVAR <code> <site>";
pub const AVAILABILITY_USAGE: &str = "DISPONIBILIDAD <code>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Execute(Operation),
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty request")]
    Empty,

    #[error("invalid format, usage: {0}")]
    Usage(&'static str),

    #[error("unrecognized request")]
    Unrecognized(String),
}

/// Parse one request line. A missing or non-numeric user id becomes
/// `default_user_id`; extra trailing arguments are ignored.
pub fn parse(line: &str, default_user_id: i32) -> Result<Command, CommandError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(verb) = parts.first() else {
        return Err(CommandError::Empty);
    };

    let code_and_site = |usage| match (parts.get(1), parts.get(2)) {
        (Some(code), Some(site)) => Ok((code.to_string(), site.to_string())),
        _ => Err(CommandError::Usage(usage)),
    };

    let op = match verb.to_ascii_uppercase().as_str() {
        "PRESTAMO" => {
            let (code, site) = code_and_site(LOAN_USAGE)?;
            let user_id = parts
                .get(3)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(default_user_id);
            Operation::Loan {
                code,
                site,
                user_id,
            }
        }
        "DEVOLVER" => {
            let (code, site) = code_and_site(RETURN_USAGE)?;
            Operation::Return { code, site }
        }
        "RENOVAR" => {
            let (code, site) = code_and_site(RENEWAL_USAGE)?;
            Operation::Renewal { code, site }
        }
        "DISPONIBILIDAD?" | "DISPONIBILIDAD" => {
            let code = parts
                .get(1)
                .ok_or(CommandError::Usage(AVAILABILITY_USAGE))?;
            Operation::Availability {
                code: code.to_string(),
            }
        }
        "STATUS" => return Ok(Command::Status),
        _ => return Err(CommandError::Unrecognized(line.trim().to_string())),
    };
    Ok(Command::Execute(op))
}

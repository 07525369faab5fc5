//! 🚦 `Status`: the little envelope every boundary hands back.
//!
//! Inside the crate we speak `Result`. At the edges (the notifier, the job summary the
//! CLI prints) callers want one flat shape they can log or serialize: ok or not, a
//! message, and maybe a numeric code. That's this.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: String::new(),
            code: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            code: None,
        }
    }

    pub fn error(message: impl Into<String>, code: Option<u16>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            code,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return write!(f, "Status(OK)");
        }
        match self.code {
            Some(code) => write!(f, "Status(ERROR, code={code}, message='{}')", self.message),
            None => write!(f, "Status(ERROR, message='{}')", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_an_error_status_keeps_its_code() {
        let status = Status::error("topic not found", Some(404));
        assert!(!status.is_ok());
        assert_eq!(status.code, Some(404));
        assert!(status.to_string().starts_with("Status(ERROR, code=404"));
    }

    #[test]
    fn the_one_where_ok_serializes_without_the_baggage() {
        let json = serde_json::to_string(&Status::ok()).expect("💀 Status should serialize");
        assert_eq!(json, r#"{"ok":true}"#);
        assert_eq!(Status::ok().to_string(), "Status(OK)");
    }
}

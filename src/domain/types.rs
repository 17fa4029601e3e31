use std::fmt;

pub const UNKNOWN_SESSION: &str = "unknown";
pub const ALL_VIEW: &str = "all";

/// Stable identity of one monitored session (thread).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self::unknown();
        }
        if trimmed.len() == value.len() {
            Self(value)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_SESSION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_SESSION
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A materialized timeline: one session, or every session interleaved.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ViewKey {
    All,
    Session(SessionKey),
}

impl ViewKey {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL_VIEW) {
            Self::All
        } else {
            Self::Session(SessionKey::new(trimmed))
        }
    }

    pub fn session(&self) -> Option<&SessionKey> {
        match self {
            Self::All => None,
            Self::Session(key) => Some(key),
        }
    }

    pub fn includes(&self, key: &SessionKey) -> bool {
        match self {
            Self::All => true,
            Self::Session(own) => own == key,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::All => ALL_VIEW,
            Self::Session(key) => key.as_str(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MessageKind {
    UserMessage,
    AssistantMessage,
    ReasoningSummary,
    ToolCall,
    ToolOutput,
    ToolGate,
    Other(String),
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "user_message" => Self::UserMessage,
            "assistant_message" => Self::AssistantMessage,
            "reasoning_summary" => Self::ReasoningSummary,
            "tool_call" => Self::ToolCall,
            "tool_output" => Self::ToolOutput,
            "tool_gate" => Self::ToolGate,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::ReasoningSummary => "reasoning_summary",
            Self::ToolCall => "tool_call",
            Self::ToolOutput => "tool_output",
            Self::ToolGate => "tool_gate",
            Self::Other(tag) => tag,
        }
    }

    /// User or assistant turns; everything else is tooling or status noise.
    pub fn is_dialog(&self) -> bool {
        matches!(self, Self::UserMessage | Self::AssistantMessage)
    }

    /// Status-only rows that must not affect thread counts or recency.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::ToolGate)
    }

    pub fn label(&self) -> &str {
        match self {
            Self::UserMessage => "user",
            Self::AssistantMessage => "assistant",
            Self::ReasoningSummary => "thinking",
            Self::ToolCall => "tool",
            Self::ToolOutput => "output",
            Self::ToolGate => "gate",
            Self::Other(_) => "other",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageOp {
    Update,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ViewMode {
    #[default]
    Timeline,
    Compact,
}

impl ViewMode {
    pub fn toggle(self) -> Self {
        match self {
            Self::Timeline => Self::Compact,
            Self::Compact => Self::Timeline,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::Compact => "compact",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "timeline" => Some(Self::Timeline),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_session_key_becomes_unknown() {
        assert!(SessionKey::new("  ").is_unknown());
        assert_eq!(SessionKey::new(" s1 ").as_str(), "s1");
    }

    #[test]
    fn view_key_parses_all_and_sessions() {
        assert_eq!(ViewKey::parse("ALL"), ViewKey::All);
        assert_eq!(ViewKey::parse(""), ViewKey::All);
        assert_eq!(ViewKey::parse("s1"), ViewKey::Session(SessionKey::from("s1")));
        assert!(ViewKey::All.includes(&SessionKey::from("s9")));
        assert!(!ViewKey::parse("s1").includes(&SessionKey::from("s2")));
    }

    #[test]
    fn unknown_kind_tags_are_preserved() {
        let kind = MessageKind::from_tag("token_count");
        assert_eq!(kind, MessageKind::Other("token_count".to_string()));
        assert_eq!(kind.tag(), "token_count");
        assert!(MessageKind::ToolGate.is_ephemeral());
        assert!(MessageKind::AssistantMessage.is_dialog());
    }
}

//! Remote control commands received on the data channel
//!
//! The vocabulary is closed. Nothing is actuated yet; each command is logged
//! with the action it stands for.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    PanRight,
    PanLeft,
    TiltUp,
    TiltDown,
    ZoomIn,
    ZoomOut,
    PowerOn,
    Mode1,
    Mode2,
    Mode3,
    Unrecognized(String),
}

impl FromStr for ControlCommand {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl ControlCommand {
    pub fn parse(message: &str) -> Self {
        match message {
            "x_R" => Self::PanRight,
            "x_L" => Self::PanLeft,
            "y_R" => Self::TiltUp,
            "y_L" => Self::TiltDown,
            "z_R" => Self::ZoomIn,
            "z_L" => Self::ZoomOut,
            "turn on" => Self::PowerOn,
            "1" => Self::Mode1,
            "2" => Self::Mode2,
            "3" => Self::Mode3,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Wire form of the command
    pub fn as_wire(&self) -> &str {
        match self {
            Self::PanRight => "x_R",
            Self::PanLeft => "x_L",
            Self::TiltUp => "y_R",
            Self::TiltDown => "y_L",
            Self::ZoomIn => "z_R",
            Self::ZoomOut => "z_L",
            Self::PowerOn => "turn on",
            Self::Mode1 => "1",
            Self::Mode2 => "2",
            Self::Mode3 => "3",
            Self::Unrecognized(raw) => raw,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::PanRight => "move right",
            Self::PanLeft => "move left",
            Self::TiltUp => "move up",
            Self::TiltDown => "move down",
            Self::ZoomIn => "zoom in",
            Self::ZoomOut => "zoom out",
            Self::PowerOn => "turn camera on",
            Self::Mode1 => "mode 1",
            Self::Mode2 => "mode 2",
            Self::Mode3 => "mode 3",
            Self::Unrecognized(_) => "unrecognized",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Records every control message and maps it to its action
#[derive(Debug, Default)]
pub struct ControlDispatcher {
    received: Vec<String>,
    actions: Vec<&'static str>,
}

impl ControlDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, message: &str) -> ControlCommand {
        self.received.push(message.to_string());
        log::info!("Control message received: {:?}", message);

        let command = ControlCommand::parse(message);
        let action = command.action();
        if command.is_recognized() {
            log::info!("Control action: {}", action);
        } else {
            log::warn!("Unrecognized control message: {:?}", message);
        }
        self.actions.push(action);
        command
    }

    /// Every message received, in arrival order
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Action fired for each received message, parallel to `received`
    pub fn actions(&self) -> &[&'static str] {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VOCABULARY: [&str; 10] = [
        "x_R", "x_L", "y_R", "y_L", "z_R", "z_L", "turn on", "1", "2", "3",
    ];

    #[test]
    fn test_vocabulary_is_distinct() {
        let actions: std::collections::HashSet<_> = VOCABULARY
            .iter()
            .map(|m| ControlCommand::parse(m).action())
            .collect();
        assert_eq!(actions.len(), VOCABULARY.len());
        assert!(!actions.contains("unrecognized"));

        for message in VOCABULARY {
            assert_eq!(message.parse::<ControlCommand>().unwrap().as_wire(), message);
        }
    }

    #[test]
    fn test_dispatch_examples() {
        let mut dispatcher = ControlDispatcher::new();
        assert_eq!(dispatcher.dispatch("x_R"), ControlCommand::PanRight);
        assert_eq!(dispatcher.actions(), &["move right"]);

        let unknown = dispatcher.dispatch("banana");
        assert_eq!(unknown, ControlCommand::Unrecognized("banana".into()));
        assert_eq!(dispatcher.received(), &["x_R".to_string(), "banana".to_string()]);
        assert_eq!(dispatcher.actions(), &["move right", "unrecognized"]);
    }

    #[test]
    fn test_matching_is_exact() {
        assert!(!ControlCommand::parse("X_R").is_recognized());
        assert!(!ControlCommand::parse(" 1").is_recognized());
        assert!(!ControlCommand::parse("turn  on").is_recognized());
    }

    proptest! {
        #[test]
        fn prop_dispatch_appends_once(message in ".*") {
            let mut dispatcher = ControlDispatcher::new();
            dispatcher.dispatch("1");
            let before = dispatcher.received().len();

            let command = dispatcher.dispatch(&message);

            prop_assert_eq!(dispatcher.received().len(), before + 1);
            prop_assert_eq!(dispatcher.actions().len(), before + 1);
            prop_assert_eq!(dispatcher.received().last().unwrap(), &message);
            prop_assert_eq!(command.is_recognized(), VOCABULARY.contains(&message.as_str()));
        }
    }
}

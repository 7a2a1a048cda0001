use std::fmt;

use strum_macros::EnumString;

/// One named operation over a model. Any name that is not a built-in action
/// refers to a custom action declared on the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
pub enum Action {
    #[strum(serialize = "create")]
    Create,
    #[strum(serialize = "readOne")]
    ReadOne,
    #[strum(serialize = "readList")]
    ReadList,
    #[strum(serialize = "update")]
    Update,
    #[strum(serialize = "delete")]
    Delete,
    #[strum(default)]
    Custom(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Create => "create",
            Action::ReadOne => "readOne",
            Action::ReadList => "readList",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Custom(name) => name,
        }
    }

    /// Resolves an action name. Unknown names become [`Action::Custom`].
    pub fn parse_name(name: &str) -> Self {
        name.parse()
            .unwrap_or_else(|_| Action::Custom(name.to_string()))
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Action::Custom(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, FrameworkError};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(NodeId);
id_newtype!(SubscriptionId);
id_newtype!(ControllerId);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptKind {
    Before,
    After,
    Around,
}

impl InterceptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Around => "around",
        }
    }
}

impl FromStr for InterceptKind {
    type Err = FrameworkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "around" => Ok(Self::Around),
            "" => Err(FrameworkError::missing_argument(
                "Controller::add_intercept",
                "intercept kind",
            )),
            other => Err(FrameworkError::configuration(
                ErrorCode::InvalidInterceptType,
                "Controller::add_intercept",
                format!("intercept kind '{other}' is not \"before\", \"after\", or \"around\""),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokableKind {
    Command,
    Behavior,
    Rule,
}

impl fmt::Display for InvokableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Command => "command",
            Self::Behavior => "behavior",
            Self::Rule => "rule",
        };
        f.write_str(label)
    }
}

mod run;

use crate::options::Options;

/// Action enum representing each possible command
#[derive(Debug)]
pub enum Action {
    /// Wait for the database, apply the schema and exit
    Initialize { options: Options },
    /// Wait for dependencies, apply the schema and serve HTTPS
    Serve { options: Options },
}

impl Action {
    #[must_use]
    pub const fn options(&self) -> &Options {
        match self {
            Self::Initialize { options } | Self::Serve { options } => options,
        }
    }

    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails to execute
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ServiceMode;

    #[test]
    fn test_action_debug() {
        let action = Action::Serve {
            options: Options::default(),
        };

        let debug_str = format!("{action:?}");
        assert!(debug_str.contains("Serve"));
    }

    #[test]
    fn test_action_options() {
        let options = Options {
            mode: ServiceMode::Initialize,
            port: 9443,
            ..Options::default()
        };
        let action = Action::Initialize { options };

        assert_eq!(action.options().mode, ServiceMode::Initialize);
        assert_eq!(action.options().port, 9443);
    }
}

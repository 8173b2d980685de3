//! `faultline config`: print the effective configuration.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput(pub Config);

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.0).unwrap_or_else(|err| format!("<unprintable config: {err}>"))
    }
}

pub fn execute(config: Config, json_mode: bool) -> Result<()> {
    output(&ConfigOutput(config), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_output_formats() {
        let rendered = ConfigOutput(Config::default());
        assert!(rendered.to_human().contains("interval_ms: 500"));
        assert_eq!(rendered.to_json()["message_bus"]["mailbox_capacity"], 256);
    }
}

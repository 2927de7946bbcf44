//! Source definition strings.
//!
//! A source is named as `interface:flag=value,flag=value`. The interface part
//! is mandatory; flags are free-form key/value pairs interpreted by the
//! helper. Flag keys are case-insensitive, values are kept verbatim.

use crate::error::{ProtoError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDefinition {
    interface: String,
    flags: Vec<(String, String)>,
}

impl SourceDefinition {
    pub fn parse(definition: &str) -> Result<Self> {
        let definition = definition.trim();
        let (head, tail) = match definition.split_once(':') {
            Some((head, tail)) => (head, Some(tail)),
            None => (definition, None),
        };

        if head.is_empty() {
            return Err(ProtoError::Definition(
                "unable to find interface in definition".into(),
            ));
        }

        let mut flags = Vec::new();
        if let Some(tail) = tail {
            for part in tail.split(',').filter(|p| !p.is_empty()) {
                match part.split_once('=') {
                    Some((k, v)) => flags.push((k.to_ascii_lowercase(), v.to_string())),
                    None => flags.push((part.to_ascii_lowercase(), String::new())),
                }
            }
        }

        Ok(Self {
            interface: head.to_string(),
            flags,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// First value for a flag, if present.
    pub fn flag(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.flags
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// True iff the flag is present with the value `true` (case-insensitive).
    pub fn flag_bool(&self, name: &str) -> bool {
        self.flag(name)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_interface() {
        let def = SourceDefinition::parse("wlan0").unwrap();
        assert_eq!(def.interface(), "wlan0");
        assert_eq!(def.flag("vif"), None);
    }

    #[test]
    fn interface_with_flags() {
        let def = SourceDefinition::parse("wlan0:vif=wifimon,fcsfail=true,plcpfail=TRUE").unwrap();
        assert_eq!(def.interface(), "wlan0");
        assert_eq!(def.flag("vif"), Some("wifimon"));
        assert!(def.flag_bool("fcsfail"));
        assert!(def.flag_bool("plcpfail"));
        assert!(!def.flag_bool("ignoreprimary"));
    }

    #[test]
    fn empty_definition_is_rejected() {
        assert!(SourceDefinition::parse("").is_err());
        assert!(SourceDefinition::parse(":vif=x").is_err());
    }

    #[test]
    fn flag_values_keep_case() {
        let def = SourceDefinition::parse("wlan0:VIF=WiFiMon").unwrap();
        assert_eq!(def.flag("vif"), Some("WiFiMon"));
    }
}

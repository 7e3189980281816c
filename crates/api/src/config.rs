//! Types for use when configuring wotfetch modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> WotResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| WotError::other_src("encode", e))?,
    )
    .map_err(|e| WotError::other_src("decode", e))
}

/// Denotes a type used to configure a specific wotfetch module.
///
/// The types behind this trait carry configuration that cannot be changed
/// at runtime, the likes of which might be found in a configuration file:
/// concurrency bounds, coalescing delays, capacity thresholds.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Wotfetch configuration.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// When wotfetch is generating a default or example configuration
    /// file, it will pass a mutable reference of this config struct to
    /// the module factories that are configured to be used. Those
    /// factories should call this function to add their default
    /// configuration parameters to that file.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
        module_name: String,
    ) -> WotResult<()> {
        if self.0.contains_key(&module_name) {
            return Err(WotError::other(format!(
                "Refusing to overwrite conflicting module name: {module_name}"
            )));
        }
        self.0.insert(module_name, tc(&M::default())?);
        Ok(())
    }

    /// When wotfetch is initializing, each module factory may call this
    /// function to extract its module config. Note that this config can be
    /// loaded from disk and edited by humans, so module config
    /// serialization should be tolerant to missing properties, setting
    /// sane defaults.
    pub fn get_module_config<M: ModConfig>(
        &self,
        module_name: &str,
    ) -> WotResult<M> {
        self.0
            .get(module_name)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_usage_example() {
        #[derive(
            Debug, Default, serde::Serialize, serde::Deserialize, PartialEq,
        )]
        struct Mod1 {
            #[serde(default)]
            parallel: u32,
            #[serde(default)]
            label: String,
        }

        impl ModConfig for Mod1 {}

        let mut config = Config::default();
        config
            .add_default_module_config::<Mod1>("mod1".into())
            .unwrap();

        // serde_json maps order keys alphabetically
        assert_eq!(
            r##"{
  "mod1": {
    "label": "",
    "parallel": 0
  }
}"##,
            serde_json::to_string_pretty(&config).unwrap()
        );

        // a hand-edited config with missing and extraneous props loads
        let config: Config = serde_json::from_str(
            r#"{
          "modBAD": { "foo": "bar" },
          "mod1": { "parallel": 3, "extra": true }
        }"#,
        )
        .unwrap();

        assert_eq!(
            Mod1 {
                parallel: 3,
                label: "".to_string(),
            },
            config.get_module_config::<Mod1>("mod1").unwrap(),
        );

        // unset mods get the default
        assert_eq!(
            Mod1::default(),
            config.get_module_config::<Mod1>("NOT-SET").unwrap(),
        );
    }

    #[test]
    fn conflicting_module_name_is_refused() {
        #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
        struct M {}
        impl ModConfig for M {}

        let mut config = Config::default();
        config.add_default_module_config::<M>("m".into()).unwrap();
        assert!(config.add_default_module_config::<M>("m".into()).is_err());
    }
}

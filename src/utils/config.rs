//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// the listed fields with whatever a TOML fragment (if one was given)
/// specifies for them. A field in the fragment that is not in the list is
/// an error, so typos in `--config-str` fail loudly instead of silently
/// keeping a default. Returns `Ok(config)` on success and
/// `Err(ReplikvError)` on any parse failure.
///
/// Example:
/// ```ignore
/// let config = parsed_config!(config_str => ClientConfigAbd; rpc_timeout_ms)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        (|| -> Result<$config_type, $crate::ReplikvError> {
            let mut config: $config_type = Default::default();

            let config_str: Option<&str> = $config_str;
            let Some(config_str) = config_str else {
                // no fragment given; all defaults
                return Ok(config);
            };
            let mut table = config_str.parse::<toml::Table>()?;

            $(
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            )+

            // every recognized field has been taken out of the table by
            // now, so any leftover key is a field this struct doesn't have
            if let Some(unknown) = table.keys().next() {
                return Err($crate::ReplikvError(format!(
                    "unrecognized config field '{}'",
                    unknown,
                )));
            }

            Ok(config)
        })()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::ReplikvError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        rpc_timeout_ms: u64,
        lock_timeout_ms: u64,
        bind_host: String,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                rpc_timeout_ms: 5000,
                lock_timeout_ms: 30_000,
                bind_host: "0.0.0.0".into(),
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), ReplikvError> {
        let config = parsed_config!(None => TestConfig;
                                    rpc_timeout_ms, lock_timeout_ms,
                                    bind_host)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), ReplikvError> {
        let config_str = Some("lock_timeout_ms = 2000");
        let config = parsed_config!(config_str => TestConfig;
                                    rpc_timeout_ms, lock_timeout_ms)?;
        let ref_config = TestConfig {
            rpc_timeout_ms: 5000,
            lock_timeout_ms: 2000,
            bind_host: "0.0.0.0".into(),
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_multiple_fields() -> Result<(), ReplikvError> {
        let config_str =
            Some("rpc_timeout_ms = 800\nbind_host = '127.0.0.1'");
        let config = parsed_config!(config_str => TestConfig;
                                    rpc_timeout_ms, lock_timeout_ms,
                                    bind_host)?;
        assert_eq!(config.rpc_timeout_ms, 800);
        assert_eq!(config.lock_timeout_ms, 30_000);
        assert_eq!(config.bind_host, "127.0.0.1");
        Ok(())
    }

    #[test]
    fn parse_unrecognized_field() {
        // `lock_timeout_ms` exists on the struct but is not in the
        // recognized list here, so it must be rejected like any typo
        let config_str = Some("lock_timeout_ms = 2000");
        assert!(
            parsed_config!(config_str => TestConfig; rpc_timeout_ms).is_err()
        );
    }
}

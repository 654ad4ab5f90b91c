/// Application name, used for config/data directory names and env prefixes.
pub const APP_NAME: &str = "modprime";

/// Length of the truncated hash used in stage and context names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MODPRIME_CONFIG";

/// File name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

use std::path::PathBuf;

/// Returns a [PathBuf] to the directory where fleetctl's inventory and settings should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/fleetctl`.
/// Otherwise, it returns `~/.fleetctl` if that directory exists, or `/etc/fleetctl` if not.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/fleetctl";

    let mut path = PathBuf::new();

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }

    #[cfg(not(test))]
    {
        if let Some(user_dir) = home::home_dir().map(|home| home.join(".fleetctl")) {
            if user_dir.is_dir() {
                return user_dir;
            }
        }
        path.push("/");
    }

    path.push(CONFIG_DIR);
    path
}

/// Returns the default inventory file, `inventory.yaml` in [config_dir].
pub fn inventory_path() -> PathBuf {
    config_dir().join("inventory.yaml")
}

/// Returns the default settings file, `settings.yaml` in [config_dir].
pub fn settings_path() -> PathBuf {
    config_dir().join("settings.yaml")
}

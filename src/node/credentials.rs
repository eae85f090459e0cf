//! RPC credentials for discovered nodes
//!
//! Explicit configuration first, then the network's `.cookie` file, then
//! `rpcuser`/`rpcpassword` from `bitcoin.conf`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::RpcSettings;
use crate::primitives::Network;
use crate::rpc::Credentials;

/// Default data directory of the reference implementation
pub fn default_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir().map(|d| d.join("Bitcoin"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::home_dir().map(|h| h.join(".bitcoin"))
    }
}

/// Resolve credentials for a node of `network` whose data lives under `data_dir`
pub fn resolve_credentials(
    settings: &RpcSettings,
    data_dir: Option<&Path>,
    network: Network,
) -> Option<Credentials> {
    if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
        return Some(Credentials::new(user.clone(), password.clone()));
    }

    let data_dir = data_dir?;
    let network_dir = match network.data_subdir() {
        Some(sub) => data_dir.join(sub),
        None => data_dir.to_path_buf(),
    };

    if let Some(creds) = read_cookie(&network_dir.join(".cookie")) {
        debug!("Using cookie credentials for {}", network);
        return Some(creds);
    }

    let conf = fs::read_to_string(data_dir.join("bitcoin.conf")).ok()?;
    let values = parse_bitcoin_conf(&conf, network);
    match (values.get("rpcuser"), values.get("rpcpassword")) {
        (Some(user), Some(password)) => {
            debug!("Using bitcoin.conf credentials for {}", network);
            Some(Credentials::new(user.clone(), password.clone()))
        }
        _ => None,
    }
}

/// Read a `user:password` cookie file
pub fn read_cookie(path: &Path) -> Option<Credentials> {
    let contents = fs::read_to_string(path).ok()?;
    let (user, password) = contents.trim().split_once(':')?;
    Some(Credentials::new(user, password))
}

/// Key/value settings that apply to `network`
///
/// Global entries come first; entries in the network's `[section]` override
/// them. Later duplicates win.
pub fn parse_bitcoin_conf(contents: &str, network: Network) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut section: Option<String> = None;

    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = Some(name.trim().to_lowercase());
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let applies = match section.as_deref() {
            None => true,
            Some(name) => Network::from_chain_name(name) == Some(network),
        };
        if applies {
            values.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sections_override_globals() {
        let conf = "\
rpcuser=global # trailing comment
rpcpassword=globalpw
[regtest]
rpcuser=reg
[main]
rpcuser=mainuser
";
        let regtest = parse_bitcoin_conf(conf, Network::Regtest);
        assert_eq!(regtest.get("rpcuser").map(String::as_str), Some("reg"));
        assert_eq!(regtest.get("rpcpassword").map(String::as_str), Some("globalpw"));

        let main = parse_bitcoin_conf(conf, Network::Mainnet);
        assert_eq!(main.get("rpcuser").map(String::as_str), Some("mainuser"));

        let signet = parse_bitcoin_conf(conf, Network::Signet);
        assert_eq!(signet.get("rpcuser").map(String::as_str), Some("global"));
    }

    #[test]
    fn test_explicit_settings_win() {
        let settings = RpcSettings {
            user: Some("env".into()),
            password: Some("envpw".into()),
            ..Default::default()
        };
        let creds = resolve_credentials(&settings, None, Network::Mainnet).unwrap();
        assert_eq!(creds, Credentials::new("env", "envpw"));
    }

    #[test]
    fn test_cookie_before_conf() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("regtest")).unwrap();
        fs::write(dir.path().join("regtest/.cookie"), "__cookie__:abc123\n").unwrap();
        fs::write(dir.path().join("bitcoin.conf"), "rpcuser=u\nrpcpassword=p\n").unwrap();

        let settings = RpcSettings::default();
        let regtest = resolve_credentials(&settings, Some(dir.path()), Network::Regtest).unwrap();
        assert_eq!(regtest, Credentials::new("__cookie__", "abc123"));

        // No mainnet cookie: falls through to bitcoin.conf
        let main = resolve_credentials(&settings, Some(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(main, Credentials::new("u", "p"));
    }

    #[test]
    fn test_nothing_configured() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_credentials(&RpcSettings::default(), Some(dir.path()), Network::Testnet)
            .is_none());
    }
}

//! Broker addresses and the rumqttc transport they need.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::Transport;
use std::path::Path;
use url::{Host, Url};

/// Where the broker lives and whether the connection is encrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerAddress {
    /// Accepts `host:port`, `[v6]:port`, `mqtt://` / `tcp://` and `mqtts://` / `ssl://`.
    /// A port is always required. `force_tls` upgrades plain addresses.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let url = if addr.contains("://") {
            Url::parse(addr)
        } else {
            Url::parse(&format!("mqtt://{}", addr))
        }
        .with_context(|| format!("invalid MQTT broker address '{}'", addr))?;

        let use_tls = match url.scheme() {
            "mqtt" | "tcp" => force_tls,
            "mqtts" | "ssl" => true,
            other => bail!("unsupported MQTT scheme '{}' in '{}'", other, addr),
        };
        let host = match url.host() {
            Some(Host::Domain(name)) if !name.is_empty() => name.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => bail!("missing MQTT host in '{}'", addr),
        };
        let port = url
            .port()
            .ok_or_else(|| anyhow!("missing MQTT port in '{}'", addr))?;

        Ok(Self {
            host,
            port,
            use_tls,
        })
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// PEM files for the TLS connection. All optional; cert and key go together.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsFiles<'a> {
    pub ca: Option<&'a Path>,
    pub client_cert: Option<&'a Path>,
    pub client_key: Option<&'a Path>,
}

impl TlsFiles<'_> {
    fn any(&self) -> bool {
        self.ca.is_some() || self.client_cert.is_some() || self.client_key.is_some()
    }
}

/// Plain TCP, TLS with the bundled roots, or TLS with a custom CA (and optional
/// client certificate).
pub fn transport_for(address: &BrokerAddress, files: TlsFiles<'_>) -> Result<Transport> {
    if !address.use_tls {
        if files.any() {
            bail!("MQTT TLS files are set but {} is not a TLS address", address);
        }
        return Ok(Transport::tcp());
    }

    let client_auth = match (files.client_cert, files.client_key) {
        (Some(cert), Some(key)) => Some((
            read_pem(cert, "client cert")?,
            read_pem(key, "client key")?,
        )),
        (None, None) => None,
        (Some(_), None) => bail!("MQTT client certificate given without a key"),
        (None, Some(_)) => bail!("MQTT client key given without a certificate"),
    };

    match files.ca {
        Some(ca) => Ok(Transport::tls(read_pem(ca, "CA")?, client_auth, None)),
        None if client_auth.is_some() => {
            bail!("MQTT client certificates need an explicit CA (mqtt.ca_path)")
        }
        None => Ok(Transport::tls_with_default_config()),
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read MQTT TLS {} '{}'", what, path.display()))
}

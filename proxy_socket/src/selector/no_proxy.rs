use std::net::IpAddr;

/// Hosts that bypass every proxy, in the `no_proxy` environment variable format:
/// `*`, exact host names or IP addresses, and domain suffixes (`.corp` or `corp`).
#[derive(Clone, Debug, Default)]
pub struct NoProxy {
    entries: Vec<String>,
    everything: bool,
}

impl NoProxy {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut no_proxy = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim().to_ascii_lowercase();
            if entry == "*" {
                no_proxy.everything = true;
            } else if !entry.is_empty() {
                no_proxy.entries.push(strip_port(&entry).to_string());
            }
        }
        no_proxy
    }

    /// Parses a comma separated list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        !self.everything && self.entries.is_empty()
    }

    pub fn matches(&self, host: &str) -> bool {
        if self.everything {
            return true;
        }

        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        let host_is_ip = host.parse::<IpAddr>().is_ok();
        self.entries.iter().any(|entry| {
            if host_is_ip {
                return *entry == host;
            }
            match entry.strip_prefix('.') {
                Some(suffix) => host == suffix || host.ends_with(entry.as_str()),
                None => host == *entry || host.ends_with(&format!(".{}", entry)),
            }
        })
    }
}

fn strip_port(entry: &str) -> &str {
    if let Some(rest) = entry.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    if entry.parse::<IpAddr>().is_ok() {
        return entry;
    }
    match entry.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => entry,
    }
}

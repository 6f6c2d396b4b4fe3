use std::{collections::HashMap, time::Instant};

use crate::api::Connection;

/// Transfer rate in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rate {
    pub up: f64,
    pub down: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateSample {
    pub upload: u64,
    pub download: u64,
    pub time: Instant,
    pub rate: Rate,
}

/// Per-connection rates, rebuilt from scratch on every snapshot.
///
/// A connection seen for the first time has rate 0; ids missing from the
/// latest snapshot are forgotten.
#[derive(Debug, Default)]
pub struct RateTracker {
    samples: HashMap<String, RateSample>,
}

impl RateTracker {
    pub fn update<'a, I>(&mut self, conns: I, now: Instant)
    where
        I: IntoIterator<Item = &'a Connection>,
    {
        let next = conns
            .into_iter()
            .map(|c| {
                let rate = match self.samples.get(&c.id) {
                    Some(prev) => {
                        let secs = now.saturating_duration_since(prev.time).as_secs_f64();
                        Rate {
                            up: per_second(c.upload, prev.upload, secs),
                            down: per_second(c.download, prev.download, secs),
                        }
                    }
                    None => Rate::default(),
                };
                let sample = RateSample {
                    upload: c.upload,
                    download: c.download,
                    time: now,
                    rate,
                };
                (c.id.clone(), sample)
            })
            .collect();
        self.samples = next;
    }

    pub fn rate(&self, id: &str) -> Rate {
        self.samples.get(id).map(|s| s.rate).unwrap_or_default()
    }

    pub fn totals(&self) -> Rate {
        self.samples.values().fold(Rate::default(), |acc, s| Rate {
            up: acc.up + s.rate.up,
            down: acc.down + s.rate.down,
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

fn per_second(current: u64, previous: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        current.saturating_sub(previous) as f64 / secs
    } else {
        0.0
    }
}

/// Aggregate rate of every connection routed through one proxy.
#[derive(Debug, Default)]
pub struct ProxyRateTracker {
    proxy: String,
    inner: RateTracker,
}

impl ProxyRateTracker {
    #[cfg(test)]
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
            inner: RateTracker::default(),
        }
    }

    #[cfg(test)]
    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    /// Switches to another proxy, dropping samples taken for the old one.
    pub fn set_proxy(&mut self, proxy: &str) {
        if self.proxy != proxy {
            self.proxy = proxy.to_string();
            self.inner.clear();
        }
    }

    pub fn update(&mut self, conns: &[Connection], now: Instant) {
        let proxy = &self.proxy;
        self.inner
            .update(conns.iter().filter(|c| c.chains.iter().any(|h| h == proxy)), now);
    }

    pub fn rate(&self) -> Rate {
        self.inner.totals()
    }
}

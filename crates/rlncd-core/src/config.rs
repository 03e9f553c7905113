//! Shared, immutable daemon configuration.
//!
//! Replaces the original daemon's global gflags with a single record built
//! once at startup and handed around as `Arc<Config>`.

use serde::{Deserialize, Serialize};

/// Loss probabilities and budget tuning, quantized to a byte range (`0..=255`)
/// the same way the wire's `E1`/`E2`/`E3` attributes are, after scaling a
/// configured `0..=100` percentage by `2.55`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossModel {
    pub e1: u8,
    pub e2: u8,
    pub e3: u8,
}

impl LossModel {
    /// Build from percentages in `0..=100`, matching the CLI surface.
    pub fn from_percent(e1_pct: u32, e2_pct: u32, e3_pct: u32) -> Self {
        let scale = |p: u32| -> u8 { ((p.min(100) as f64) * 2.55).round() as u8 };
        LossModel {
            e1: scale(e1_pct),
            e2: scale(e2_pct),
            e3: scale(e3_pct),
        }
    }
}

/// The full, immutable configuration record for one daemon instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface the kernel module's `batman_adv` helper family is bound to.
    pub interface: String,
    /// Generation size (G): number of symbols per generation.
    pub symbols: usize,
    /// Symbol size (S) in bytes.
    pub symbol_size: usize,
    /// Number of concurrently live encoder slots (N).
    pub encoders: usize,
    /// Encoder idle retirement timeout.
    pub encoder_timeout_secs: f64,
    /// Decoder idle retirement timeout.
    pub decoder_timeout_secs: f64,
    /// Decoder REQ retransmit interval.
    pub req_timeout_secs: f64,
    /// Decoder ACK retransmit interval.
    pub ack_timeout_secs: f64,
    /// Multiplicative overshoot applied to `source_budget` at the source.
    pub fixed_overshoot: f64,
    /// Three-leg channel loss model.
    pub loss: LossModel,
    /// Loop PLAIN frames straight back out as PLAIN (I/O path exercise, no
    /// coding at all).
    pub benchmark: bool,
    /// Optional TCP port serving a tiny text/plain Prometheus-style counters
    /// scrape endpoint.
    pub metrics_port: Option<u16>,
    /// Optional path to periodically dump the counters map to, in addition
    /// to the on-exit dump.
    pub counters_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: "bat0".to_string(),
            symbols: 64,
            symbol_size: 1454,
            encoders: 2,
            encoder_timeout_secs: 10.0,
            decoder_timeout_secs: 10.0,
            req_timeout_secs: 0.5,
            ack_timeout_secs: 0.5,
            fixed_overshoot: 1.06,
            loss: LossModel::from_percent(0, 0, 0),
            benchmark: false,
            metrics_port: None,
            counters_path: None,
        }
    }
}

impl Config {
    /// Parse a TOML configuration file, falling back to defaults for any
    /// field it omits.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Config> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct PartialLoss {
            e1: Option<u32>,
            e2: Option<u32>,
            e3: Option<u32>,
        }

        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Partial {
            interface: Option<String>,
            symbols: Option<usize>,
            symbol_size: Option<usize>,
            encoders: Option<usize>,
            encoder_timeout_secs: Option<f64>,
            decoder_timeout_secs: Option<f64>,
            req_timeout_secs: Option<f64>,
            ack_timeout_secs: Option<f64>,
            fixed_overshoot: Option<f64>,
            loss: Option<PartialLoss>,
            benchmark: Option<bool>,
            metrics_port: Option<u16>,
            counters_path: Option<String>,
        }

        let partial: Partial = toml::from_str(s)?;
        let mut cfg = Config::default();

        if let Some(v) = partial.interface {
            cfg.interface = v;
        }
        if let Some(v) = partial.symbols {
            cfg.symbols = v;
        }
        if let Some(v) = partial.symbol_size {
            cfg.symbol_size = v;
        }
        if let Some(v) = partial.encoders {
            cfg.encoders = v;
        }
        if let Some(v) = partial.encoder_timeout_secs {
            cfg.encoder_timeout_secs = v;
        }
        if let Some(v) = partial.decoder_timeout_secs {
            cfg.decoder_timeout_secs = v;
        }
        if let Some(v) = partial.req_timeout_secs {
            cfg.req_timeout_secs = v;
        }
        if let Some(v) = partial.ack_timeout_secs {
            cfg.ack_timeout_secs = v;
        }
        if let Some(v) = partial.fixed_overshoot {
            cfg.fixed_overshoot = v;
        }
        if let Some(loss) = partial.loss {
            cfg.loss = LossModel::from_percent(
                loss.e1.unwrap_or(0),
                loss.e2.unwrap_or(0),
                loss.e3.unwrap_or(0),
            );
        }
        if let Some(v) = partial.benchmark {
            cfg.benchmark = v;
        }
        if let Some(v) = partial.metrics_port {
            cfg.metrics_port = Some(v);
        }
        if let Some(v) = partial.counters_path {
            cfg.counters_path = Some(v);
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_original_daemon_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.interface, "bat0");
        assert_eq!(cfg.symbols, 64);
        assert_eq!(cfg.symbol_size, 1454);
        assert_eq!(cfg.encoders, 2);
        assert_eq!(cfg.fixed_overshoot, 1.06);
    }

    #[test]
    fn loss_model_scales_percent_to_byte() {
        let l = LossModel::from_percent(100, 50, 0);
        assert_eq!(l.e1, 255);
        assert_eq!(l.e2, 128);
        assert_eq!(l.e3, 0);
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let cfg = Config::from_toml_str("symbols = 16\nencoders = 4\n").unwrap();
        assert_eq!(cfg.symbols, 16);
        assert_eq!(cfg.encoders, 4);
        assert_eq!(cfg.symbol_size, 1454);
    }
}

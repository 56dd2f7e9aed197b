use prometheus::{
    opts, Counter, Encoder, Gauge, IntCounter, IntCounterVec, Registry, TextEncoder,
};
use spigot_common::utils::converter::format_ether;

/// Prometheus metrics for one faucet instance.
///
/// Amounts are exported in ether as floats; wei overflows the integer
/// metric types at ordinary faucet volumes.
#[derive(Debug, Clone)]
pub struct FaucetMetrics {
    registry: Registry,

    pub dispenses_total: IntCounter,
    pub dispensed_ether_total: Counter,
    pub rejections_total: IntCounterVec,
    pub balance_ether: Gauge,
}

impl FaucetMetrics {
    /// Create new metrics instance
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let dispenses_total = IntCounter::with_opts(opts!(
            "faucet_dispenses_total",
            "Total number of successful dispenses"
        ))?;

        let dispensed_ether_total = Counter::with_opts(opts!(
            "faucet_dispensed_ether_total",
            "Total amount dispensed, in ether"
        ))?;

        let rejections_total = IntCounterVec::new(
            opts!("faucet_rejections_total", "Rejected faucet calls by reason"),
            &["reason"],
        )?;

        let balance_ether = Gauge::with_opts(opts!(
            "faucet_balance_ether",
            "Current faucet balance, in ether"
        ))?;

        registry.register(Box::new(dispenses_total.clone()))?;
        registry.register(Box::new(dispensed_ether_total.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(balance_ether.clone()))?;

        Ok(Self {
            registry,
            dispenses_total,
            dispensed_ether_total,
            rejections_total,
            balance_ether,
        })
    }

    pub fn record_dispense(&self, amount: u128) {
        self.dispenses_total.inc();
        self.dispensed_ether_total.inc_by(wei_to_ether(amount));
    }

    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    pub fn set_balance(&self, balance: u128) {
        self.balance_ether.set(wei_to_ether(balance));
    }

    /// Render metrics in the prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn wei_to_ether(wei: u128) -> f64 {
    format_ether(wei).parse().unwrap_or(f64::MAX)
}

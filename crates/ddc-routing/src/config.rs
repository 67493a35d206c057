//! Router configuration

/// Which reversal engine a router runs
///
/// The two engines are not interchangeable mid-flight: the sequence
/// strategy assumes a single in-flight reversal per link, while the
/// locking strategy tolerates concurrent multi-link reversal at the cost
/// of the cross-neighbor lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Asynchronous single-link reversal over per-link sequence bits
    #[default]
    Sequence,
    /// Synchronous all-edges-out reversal under a cross-neighbor lock
    Locking,
}

/// Tunables for one router instance
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Reversal engine to run
    pub strategy: StrategyKind,
    /// With this off the engine reports NoRoute instead of reversing
    pub allow_reversal: bool,
    /// Maximum times a packet may be sent back out its ingress
    pub max_bounces: u8,
    /// Ticks between reanimation probes of dead interfaces
    pub reanimation_interval: u64,
    /// Delay before an Input-to-Output reversal takes effect, in ticks
    pub reverse_input_to_output_delay: u64,
    /// Delay before an Output-to-Input reversal takes effect, in ticks
    pub reverse_output_to_input_delay: u64,
    /// Delay before retrying a denied lock acquisition, in ticks
    pub aeo_retry_delay: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Sequence,
            allow_reversal: true,
            max_bounces: 16,
            reanimation_interval: 5,
            reverse_input_to_output_delay: 0,
            reverse_output_to_input_delay: 0,
            aeo_retry_delay: 2,
        }
    }
}

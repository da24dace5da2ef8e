use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

use crate::types::ServiceId;
use crate::GkaError;

/// Which key agreement runs on top of the shared message set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVariant {
    /// Sequential sponsor hand-off, chained Diffie-Hellman.
    #[default]
    Chained,
    /// One sponsor hands an encrypted group secret to every member.
    Distributed,
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVariant::Chained => f.write_str("chained"),
            ProtocolVariant::Distributed => f.write_str("distributed"),
        }
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chained" | "str" => Ok(ProtocolVariant::Chained),
            "distributed" | "star" => Ok(ProtocolVariant::Distributed),
            other => Err(format!(
                "unknown protocol variant '{other}' (expected chained or distributed)"
            )),
        }
    }
}

/// Window a retransmission delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterDelay {
    min: Duration,
    max: Duration,
}

impl ScatterDelay {
    /// Bounds given in reverse order are swapped.
    pub fn new(a: Duration, b: Duration) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    pub fn from_millis(a: u64, b: u64) -> Self {
        Self::new(Duration::from_millis(a), Duration::from_millis(b))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Uniform sample from `[min, max]`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        let span = (self.max - self.min).as_nanos() as u64;
        if span == 0 {
            return self.min;
        }
        self.min + Duration::from_nanos(rng.random_range(0..=span))
    }
}

impl Default for ScatterDelay {
    fn default() -> Self {
        Self::from_millis(10, 200)
    }
}

/// Configuration of one member.
///
/// ```rust
/// use gka_protocol::{MemberConfig, ScatterDelay};
///
/// let config = MemberConfig::new(1, 4)
///     .sponsor(true)
///     .scatter_delay(ScatterDelay::from_millis(20, 50));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MemberConfig {
    pub(crate) service_id: ServiceId,
    /// Expected number of members, including this one.
    pub(crate) member_count: u16,
    pub(crate) is_sponsor: bool,
    pub(crate) scatter_delay: ScatterDelay,
    /// How long the finishing member keeps repeating FINISH.
    pub(crate) finish_timeout: Duration,
    pub(crate) variant: ProtocolVariant,
    /// Fixed seed for key generation and delays. Random when unset.
    pub(crate) rng_seed: Option<u64>,
}

impl MemberConfig {
    pub fn new(service_id: ServiceId, member_count: u16) -> Self {
        Self {
            service_id,
            member_count,
            is_sponsor: false,
            scatter_delay: ScatterDelay::default(),
            finish_timeout: Duration::from_secs(5),
            variant: ProtocolVariant::default(),
            rng_seed: None,
        }
    }

    pub fn sponsor(mut self, is_sponsor: bool) -> Self {
        self.is_sponsor = is_sponsor;
        self
    }

    pub fn scatter_delay(mut self, delay: ScatterDelay) -> Self {
        self.scatter_delay = delay;
        self
    }

    /// Set the finish timeout (default: 5 s).
    pub fn finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout = timeout;
        self
    }

    pub fn variant(mut self, variant: ProtocolVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn member_count(&self) -> u16 {
        self.member_count
    }

    pub fn is_sponsor(&self) -> bool {
        self.is_sponsor
    }

    pub fn get_scatter_delay(&self) -> ScatterDelay {
        self.scatter_delay
    }

    pub fn get_finish_timeout(&self) -> Duration {
        self.finish_timeout
    }

    pub fn get_variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn validate(&self) -> Result<(), GkaError> {
        if self.service_id == 0 {
            return Err(GkaError::InvalidConfig(
                "service id must be positive".into(),
            ));
        }
        if self.member_count == 0 {
            return Err(GkaError::InvalidConfig(
                "member count must be at least 1".into(),
            ));
        }
        if self.finish_timeout.is_zero() {
            return Err(GkaError::InvalidConfig(
                "finish timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn scatter_delay_swaps_reversed_bounds() {
        let delay = ScatterDelay::from_millis(200, 10);
        assert_eq!(delay.min(), Duration::from_millis(10));
        assert_eq!(delay.max(), Duration::from_millis(200));
    }

    #[test]
    fn scatter_delay_samples_stay_in_window() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let delay = ScatterDelay::from_millis(10, 20);
        for _ in 0..1000 {
            let d = delay.sample(&mut rng);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn degenerate_window_is_constant() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let delay = ScatterDelay::from_millis(30, 30);
        assert_eq!(delay.sample(&mut rng), Duration::from_millis(30));
    }

    #[test]
    fn defaults() {
        let config = MemberConfig::new(1, 3);
        assert!(!config.is_sponsor());
        assert_eq!(config.get_scatter_delay(), ScatterDelay::from_millis(10, 200));
        assert_eq!(config.get_finish_timeout(), Duration::from_secs(5));
        assert_eq!(config.get_variant(), ProtocolVariant::Chained);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_service_and_count() {
        assert!(MemberConfig::new(0, 3).validate().is_err());
        assert!(MemberConfig::new(1, 0).validate().is_err());
        assert!(MemberConfig::new(1, 1).validate().is_ok());
    }

    #[test]
    fn variant_parses_case_insensitively() {
        assert_eq!("Chained".parse::<ProtocolVariant>(), Ok(ProtocolVariant::Chained));
        assert_eq!("DISTRIBUTED".parse::<ProtocolVariant>(), Ok(ProtocolVariant::Distributed));
        assert!("tree".parse::<ProtocolVariant>().is_err());
    }
}

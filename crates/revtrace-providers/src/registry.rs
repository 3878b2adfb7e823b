use std::collections::HashMap;

use revtrace_types::Source;

use crate::apple::AppleNormalizer;
use crate::google::GoogleNormalizer;
use crate::recurly::RecurlyNormalizer;
use crate::stripe::StripeNormalizer;
use crate::traits::Normalizer;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct NormalizerMetadata {
    pub source: Source,
    pub description: &'static str,
    pub signature_scheme: &'static str,
}

const NORMALIZERS: &[NormalizerMetadata] = &[
    NormalizerMetadata {
        source: Source::Stripe,
        description: "Stripe subscriptions and invoices",
        signature_scheme: "Stripe-Signature HMAC-SHA256",
    },
    NormalizerMetadata {
        source: Source::AppleAppStore,
        description: "App Store Server Notifications V2",
        signature_scheme: "JWS signedPayload (ES256)",
    },
    NormalizerMetadata {
        source: Source::GooglePlay,
        description: "Google Play RTDN via Pub/Sub push",
        signature_scheme: "shared push token",
    },
    NormalizerMetadata {
        source: Source::Recurly,
        description: "Recurly webhook notifications",
        signature_scheme: "recurly-signature HMAC-SHA256",
    },
];

pub fn get_all_normalizers() -> &'static [NormalizerMetadata] {
    NORMALIZERS
}

pub fn create(source: Source) -> Box<dyn Normalizer> {
    match source {
        Source::Stripe => Box::new(StripeNormalizer),
        Source::AppleAppStore => Box::new(AppleNormalizer),
        Source::GooglePlay => Box::new(GoogleNormalizer),
        Source::Recurly => Box::new(RecurlyNormalizer),
    }
}

/// Plain `source → normalizer` map populated at startup from the known
/// list; no dynamic discovery
pub struct Registry {
    normalizers: HashMap<Source, Box<dyn Normalizer>>,
}

impl Registry {
    pub fn with_all() -> Self {
        let mut normalizers: HashMap<Source, Box<dyn Normalizer>> = HashMap::new();
        for meta in NORMALIZERS {
            normalizers.insert(meta.source, create(meta.source));
        }
        Self { normalizers }
    }

    pub fn get(&self, source: Source) -> Result<&dyn Normalizer> {
        self.normalizers
            .get(&source)
            .map(|n| n.as_ref())
            .ok_or_else(|| Error::Provider(format!("no normalizer for source: {}", source)))
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.normalizers.keys().copied().collect();
        sources.sort_by_key(|s| s.as_str());
        sources
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_source() {
        let registry = Registry::with_all();
        for source in Source::ALL {
            let normalizer = registry.get(source).unwrap();
            assert_eq!(normalizer.source(), source);
        }
    }

    #[test]
    fn metadata_matches_sources() {
        assert_eq!(get_all_normalizers().len(), Source::ALL.len());
    }
}

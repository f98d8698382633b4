//! Address extraction pipeline
//!
//! Three pure stages turn raw log bytes into classified addresses:
//!
//! ```text
//! bytes ──► AddressParser ──► canonicalize ──► AddressFilter ──► AddressClassifier
//!           (dotted quads)     (Ipv4Addr)       (admit/reject)    (private/public)
//! ```
//!
//! [`Extraction`] bundles the stages so a scan worker can run them over a
//! chunk without sharing any mutable state.

pub mod block;
pub mod classifier;
pub mod filter;
pub mod parser;

pub use block::Ipv4Block;
pub use classifier::{AddressClass, AddressClassifier, PRIVATE_BLOCKS};
pub use filter::{AddressFilter, FilterPolicy};
pub use parser::{AddressParser, Addresses, canonicalize};

use crate::scan::ScanResult;

/// The parse → filter → classify stages, ready to run over a buffer
#[derive(Debug, Clone, Copy)]
pub struct Extraction {
    parser: AddressParser,
    filter: AddressFilter,
    classifier: AddressClassifier,
}

impl Extraction {
    /// Build an extraction pipeline with the given admission policy
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            parser: AddressParser::new(),
            filter: AddressFilter::new(policy),
            classifier: AddressClassifier,
        }
    }

    /// Run all stages over `text`, collecting unique addresses per class
    pub fn scan(&self, text: &[u8]) -> ScanResult {
        let mut result = ScanResult::default();

        for candidate in self.parser.parse(text) {
            // The parser only yields in-range quads
            let Some(ip) = canonicalize(candidate) else {
                continue;
            };

            if !self.filter.is_admissible(ip) {
                continue;
            }

            result.insert(self.classifier.classify(ip), ip);
        }

        result
    }
}

impl Default for Extraction {
    fn default() -> Self {
        Self::new(FilterPolicy::default())
    }
}

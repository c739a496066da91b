//! Outcome of the scan command family.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Signature names per scanned object, in the order clamd reported them.
pub type Detections = BTreeMap<String, Vec<String>>;

/// Result of a SCAN, CONTSCAN, MULTISCAN, ALLMATCHSCAN or INSTREAM call.
///
/// `Virus` with an empty map is clean: it compares equal to `Ok` and
/// serializes as `{"status":"ok"}`.
#[derive(Debug, Clone, Default)]
pub enum ScanResult {
    #[default]
    Ok,
    Virus(Detections),
}

impl ScanResult {
    /// Build a result from detections. An empty map is a clean result.
    #[must_use]
    pub fn from_detections(detections: Detections) -> Self {
        if detections.is_empty() {
            Self::Ok
        } else {
            Self::Virus(detections)
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        match self {
            Self::Ok => true,
            Self::Virus(d) => d.is_empty(),
        }
    }

    #[must_use]
    pub fn detections(&self) -> Option<&Detections> {
        match self {
            Self::Virus(d) if !d.is_empty() => Some(d),
            _ => None,
        }
    }

    /// Union of both results. Signature lists of objects present on both
    /// sides are concatenated, `self` first; nothing is de-duplicated.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Ok, other) => other,
            (this, Self::Ok) => this,
            (Self::Virus(mut mine), Self::Virus(theirs)) => {
                for (object, signatures) in theirs {
                    mine.entry(object).or_default().extend(signatures);
                }
                Self::Virus(mine)
            }
        }
    }
}

impl PartialEq for ScanResult {
    fn eq(&self, other: &Self) -> bool {
        self.detections() == other.detections()
    }
}

impl Eq for ScanResult {}

#[derive(Serialize)]
#[serde(tag = "status", content = "detections", rename_all = "lowercase")]
enum Wire<'a> {
    Ok,
    Virus(&'a Detections),
}

impl Serialize for ScanResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.detections() {
            None => Wire::Ok,
            Some(d) => Wire::Virus(d),
        }
        .serialize(serializer)
    }
}

impl FromIterator<ScanResult> for ScanResult {
    fn from_iter<I: IntoIterator<Item = ScanResult>>(iter: I) -> Self {
        iter.into_iter().fold(Self::Ok, Self::merge)
    }
}

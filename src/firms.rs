//! Firm registry and the merging / non-merging partition.

use std::collections::HashMap;

use crate::error::{MergerError, Result};

/// Ordered set of firms together with the merger partition.
///
/// Firms are addressed by their registry index everywhere else in the crate;
/// every share vector and elasticity matrix is laid out in registry order.
#[derive(Clone, Debug)]
pub struct FirmRegistry {
    firms: Vec<String>,
    index: HashMap<String, usize>,
    partition: MergerPartition,
}

impl FirmRegistry {
    /// Creates a registry from ordered firm identifiers and the names of the merging firms.
    pub fn new<S, M>(firms: Vec<S>, merging: &[M]) -> Result<Self>
    where
        S: Into<String>,
        M: AsRef<str>,
    {
        let mut builder = FirmRegistryBuilder::new();
        for firm in firms {
            builder = builder.firm(firm);
        }
        for firm in merging {
            builder = builder.merging_firm(firm.as_ref());
        }
        builder.build()
    }

    /// Starts a builder.
    pub fn builder() -> FirmRegistryBuilder {
        FirmRegistryBuilder::new()
    }

    /// Number of registered firms.
    pub fn firm_count(&self) -> usize {
        self.firms.len()
    }

    /// Firm identifiers in registry order.
    pub fn firms(&self) -> &[String] {
        &self.firms
    }

    /// Identifier of the firm at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`firm_count`](Self::firm_count); use
    /// [`firms`](Self::firms) with `get` for a checked lookup.
    pub fn name(&self, index: usize) -> &str {
        &self.firms[index]
    }

    /// Registry index of `firm`, if registered.
    pub fn index_of(&self, firm: &str) -> Option<usize> {
        self.index.get(firm).copied()
    }

    /// Like [`index_of`](Self::index_of) but reports unknown firms as errors.
    pub fn require(&self, firm: &str) -> Result<usize> {
        self.index_of(firm).ok_or_else(|| MergerError::UnknownFirm {
            firm: firm.to_string(),
        })
    }

    /// The merger partition.
    pub fn partition(&self) -> &MergerPartition {
        &self.partition
    }

    /// Identifiers of the merging firms in registry order.
    pub fn merging_firms(&self) -> impl Iterator<Item = &str> {
        self.partition.merging().iter().map(|&i| self.name(i))
    }

    /// Identifiers of the non-merging firms in registry order.
    pub fn non_merging_firms(&self) -> impl Iterator<Item = &str> {
        self.partition.non_merging().iter().map(|&i| self.name(i))
    }
}

/// Builder that validates identifiers and the merging set before constructing a [`FirmRegistry`].
#[derive(Debug, Default)]
pub struct FirmRegistryBuilder {
    firms: Vec<String>,
    merging: Vec<String>,
}

impl FirmRegistryBuilder {
    /// Starts with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a non-merging firm (unless it is also named as merging).
    pub fn firm<S: Into<String>>(mut self, firm: S) -> Self {
        self.firms.push(firm.into());
        self
    }

    /// Marks a firm as party to the merger; it must also be registered via [`firm`](Self::firm).
    pub fn merging_firm<S: Into<String>>(mut self, firm: S) -> Self {
        self.merging.push(firm.into());
        self
    }

    /// Finalizes construction after validating identifiers and the partition.
    pub fn build(self) -> Result<FirmRegistry> {
        let mut index = HashMap::with_capacity(self.firms.len());
        for (position, firm) in self.firms.iter().enumerate() {
            if index.insert(firm.clone(), position).is_some() {
                return Err(MergerError::DuplicateFirm { firm: firm.clone() });
            }
        }

        let mut is_merging = vec![false; self.firms.len()];
        for firm in &self.merging {
            let position = *index
                .get(firm)
                .ok_or_else(|| MergerError::UnknownFirm { firm: firm.clone() })?;
            if is_merging[position] {
                return Err(MergerError::DuplicateFirm { firm: firm.clone() });
            }
            is_merging[position] = true;
        }

        let partition = MergerPartition::from_flags(&is_merging)?;

        Ok(FirmRegistry {
            firms: self.firms,
            index,
            partition,
        })
    }
}

/// Disjoint split of firm indices into merging and non-merging groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergerPartition {
    firm_count: usize,
    merging: Vec<usize>,
    non_merging: Vec<usize>,
}

impl MergerPartition {
    /// Builds a partition from per-firm merging flags, enforcing a proper merger.
    pub fn from_flags(is_merging: &[bool]) -> Result<Self> {
        let merging: Vec<usize> = (0..is_merging.len()).filter(|&i| is_merging[i]).collect();
        if merging.len() < 2 {
            return Err(MergerError::TooFewMergingFirms {
                found: merging.len(),
            });
        }
        if merging.len() == is_merging.len() {
            return Err(MergerError::NoNonMergingFirms {
                total: is_merging.len(),
            });
        }
        Ok(Self::split(is_merging))
    }

    /// Every firm prices independently; describes the market before the merger.
    pub(crate) fn independent(firm_count: usize) -> Self {
        Self::split(&vec![false; firm_count])
    }

    fn split(is_merging: &[bool]) -> Self {
        let (merging, non_merging): (Vec<usize>, Vec<usize>) =
            (0..is_merging.len()).partition(|&i| is_merging[i]);
        Self {
            firm_count: is_merging.len(),
            merging,
            non_merging,
        }
    }

    /// Total number of firms.
    pub fn firm_count(&self) -> usize {
        self.firm_count
    }

    /// Merging firm indices, ascending.
    pub fn merging(&self) -> &[usize] {
        &self.merging
    }

    /// Non-merging firm indices, ascending.
    pub fn non_merging(&self) -> &[usize] {
        &self.non_merging
    }

    /// Whether firm `index` is party to the merger.
    pub fn is_merging(&self, index: usize) -> bool {
        self.merging.binary_search(&index).is_ok()
    }
}

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use ropey::Rope;

use crate::{BufferId, ChangeSet, Error, Result};

/// One immutable entry in a buffer's history.
#[derive(Debug, Clone)]
pub struct VersionNode {
    number: u64,
    reiterated: u64,
    length: usize,
    line_count: usize,
    /// Changes that produced this version from the previous one
    changes: ChangeSet,
}

impl VersionNode {
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn reiterated_number(&self) -> u64 {
        self.reiterated
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }
}

/// Append only arena of the versions of one buffer. Versions are indexed by
/// their number, appending is the only mutation.
pub(crate) struct VersionChain {
    buffer: BufferId,
    nodes: RwLock<Vec<VersionNode>>,
}

impl VersionChain {
    pub(crate) fn new(buffer: BufferId, length: usize, line_count: usize) -> Arc<VersionChain> {
        let root = VersionNode {
            number: 0,
            reiterated: 0,
            length,
            line_count,
            changes: ChangeSet::empty(),
        };
        Arc::new(VersionChain {
            buffer,
            nodes: RwLock::new(vec![root]),
        })
    }

    /// Append the successor of `from`. `text` is the text of the new version,
    /// its length and line count are recorded.
    ///
    /// `reiterated` defaults to the new version number, or the previous
    /// reiterated number if the change set is empty.
    pub(crate) fn create_next(
        self: &Arc<Self>,
        from: u64,
        changes: ChangeSet,
        text: &Rope,
        reiterated: Option<u64>,
    ) -> Result<Version> {
        let mut nodes = self.nodes.write();
        let tail = nodes.len() as u64 - 1;
        if from != tail {
            return Err(Error::SuccessorAlreadySet { version: from });
        }

        let prev = &nodes[tail as usize];
        let number = tail + 1;
        let length = text.len_chars();
        debug_assert_eq!(
            length as isize,
            prev.length as isize + changes.delta(),
            "Version length does not match change set delta"
        );
        let line_count = text.len_lines();
        debug_assert_eq!(
            line_count as isize,
            prev.line_count as isize + changes.line_count_delta(),
            "Version line count does not match change set line delta"
        );
        let reiterated = match reiterated {
            Some(n) => {
                debug_assert!(n <= number, "Cannot reiterate future version {n}");
                n
            }
            None if changes.is_empty() => prev.reiterated,
            None => number,
        };

        nodes.push(VersionNode {
            number,
            reiterated,
            length,
            line_count,
            changes,
        });

        Ok(Version {
            chain: self.clone(),
            number,
        })
    }

    pub(crate) fn root(self: &Arc<Self>) -> Version {
        Version {
            chain: self.clone(),
            number: 0,
        }
    }

    fn tail(&self) -> u64 {
        self.nodes.read().len() as u64 - 1
    }
}

impl fmt::Debug for VersionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionChain")
            .field("buffer", &self.buffer)
            .field("versions", &self.nodes.read().len())
            .finish()
    }
}

/// Handle to one version of a buffer. Cheap to clone, can be used to read
/// the history but never to change it.
#[derive(Clone)]
pub struct Version {
    chain: Arc<VersionChain>,
    number: u64,
}

impl Version {
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn buffer(&self) -> BufferId {
        self.chain.buffer
    }

    pub fn node(&self) -> VersionNode {
        self.chain.nodes.read()[self.number as usize].clone()
    }

    pub fn reiterated_number(&self) -> u64 {
        self.chain.nodes.read()[self.number as usize].reiterated
    }

    pub fn length(&self) -> usize {
        self.chain.nodes.read()[self.number as usize].length
    }

    pub fn line_count(&self) -> usize {
        self.chain.nodes.read()[self.number as usize].line_count
    }

    /// Changes that produced this version
    pub fn changes(&self) -> ChangeSet {
        self.chain.nodes.read()[self.number as usize].changes.clone()
    }

    /// The following version if one exists yet
    pub fn next(&self) -> Option<Version> {
        if self.number < self.chain.tail() {
            Some(Version {
                chain: self.chain.clone(),
                number: self.number + 1,
            })
        } else {
            None
        }
    }

    pub fn is_same_chain(&self, other: &Version) -> bool {
        Arc::ptr_eq(&self.chain, &other.chain)
    }

    /// Error if `other` belongs to a different buffer than this version
    pub fn check_same_chain(&self, other: &Version) -> Result<()> {
        if self.is_same_chain(other) {
            Ok(())
        } else {
            Err(Error::ForeignVersion {
                expected: self.buffer(),
                found: other.buffer(),
            })
        }
    }

    /// Nodes after `self` up to and including `to`. Empty if `to` is not
    /// after `self`.
    pub(crate) fn nodes_until(&self, to: &Version) -> Vec<VersionNode> {
        if to.number <= self.number {
            return vec![];
        }

        let nodes = self.chain.nodes.read();
        nodes[self.number as usize + 1..=to.number as usize].to_vec()
    }

    pub(crate) fn at(&self, number: u64) -> Version {
        debug_assert!(number <= self.chain.tail());
        Version {
            chain: self.chain.clone(),
            number,
        }
    }

    pub(crate) fn chain(&self) -> &Arc<VersionChain> {
        &self.chain
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_chain(other) && self.number == other.number
    }
}

impl Eq for Version {}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({}@{})", self.number, self.chain.buffer)
    }
}

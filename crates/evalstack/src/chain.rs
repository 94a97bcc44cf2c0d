use evalstack_types::CallSite;
use std::sync::Arc;

/// Host call sites of the evaluations on one logical call chain.
///
/// Each evaluation extends the chain it was issued from; nested evaluations
/// (a host callback running on behalf of an outer evaluation that issues
/// another one) pass the outer chain along explicitly. Chains are immutable
/// and cheap to clone, so concurrent evaluations never share mutable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallChain {
    /// Outermost first.
    sites: Arc<[CallSite]>,
}

impl CallChain {
    /// Chain with no active evaluation.
    pub fn root() -> Self {
        Self::default()
    }

    /// New chain with `site` as the innermost evaluation.
    pub fn push(&self, site: CallSite) -> Self {
        let mut sites = Vec::with_capacity(self.sites.len() + 1);
        sites.extend(self.sites.iter().cloned());
        sites.push(site);
        Self {
            sites: sites.into(),
        }
    }

    pub fn depth(&self) -> usize {
        self.sites.len()
    }

    pub fn is_root(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn innermost(&self) -> Option<&CallSite> {
        self.sites.last()
    }

    /// Call sites in the order the composer consumes them.
    pub fn innermost_first(&self) -> Vec<CallSite> {
        self.sites.iter().rev().cloned().collect()
    }
}

use tracing::trace;

use crate::error::{AsmError, AsmResult};

const TRACE_TARGET: &str = "lkbc::asm::label";

/// A jump target whose word offset may not be known yet.
///
/// Jumps emitted before the label is bound record their site and receive a
/// placeholder displacement of `0`; [`Label::bind`] hands the recorded sites
/// back so the assembler can rewrite them.
#[derive(Debug, Clone, Default)]
pub struct Label {
    allows_backward_jumps: bool,
    bound_offset: Option<usize>,
    pending_jump_sites: Vec<usize>,
}

impl Label {
    pub fn new(allows_backward_jumps: bool) -> Self {
        Self {
            allows_backward_jumps,
            bound_offset: None,
            pending_jump_sites: Vec::new(),
        }
    }

    /// Label that may be targeted from later code, e.g. a loop header.
    pub fn backward() -> Self {
        Self::new(true)
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound_offset.is_some()
    }

    #[inline]
    pub fn offset(&self) -> Option<usize> {
        self.bound_offset
    }

    #[inline]
    pub fn allows_backward_jumps(&self) -> bool {
        self.allows_backward_jumps
    }

    pub fn pending_jump_sites(&self) -> &[usize] {
        &self.pending_jump_sites
    }

    /// Displacement operand for a jump word emitted at `site`.
    ///
    /// Returns `bound - site` once bound. While unbound the site is queued and
    /// `0` is returned as a placeholder.
    pub fn jump_operand_for(&mut self, site: usize) -> AsmResult<i64> {
        match self.bound_offset {
            Some(target) => {
                let delta = target as i64 - site as i64;
                if !self.allows_backward_jumps && delta <= 0 {
                    return Err(AsmError::PolicyViolation { site, target });
                }
                Ok(delta)
            }
            None => {
                self.pending_jump_sites.push(site);
                Ok(0)
            }
        }
    }

    /// Fix the label at `offset` and drain the jump sites that need patching.
    pub fn bind(&mut self, offset: usize) -> AsmResult<Vec<usize>> {
        if let Some(existing) = self.bound_offset {
            return Err(AsmError::DoubleBind { offset: existing });
        }
        self.bound_offset = Some(offset);
        let sites = std::mem::take(&mut self.pending_jump_sites);
        trace!(target: TRACE_TARGET, offset, sites = sites.len(), "label.bind");
        Ok(sites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_label_queues_sites() {
        let mut label = Label::default();
        assert!(!label.is_bound());
        assert_eq!(label.jump_operand_for(3).unwrap(), 0);
        assert_eq!(label.jump_operand_for(5).unwrap(), 0);
        assert_eq!(label.pending_jump_sites(), &[3, 5]);

        let sites = label.bind(9).unwrap();
        assert_eq!(sites, vec![3, 5]);
        assert!(label.pending_jump_sites().is_empty());
        assert_eq!(label.offset(), Some(9));
        assert_eq!(label.jump_operand_for(3).unwrap(), 6);
    }

    #[test]
    fn forward_only_label_rejects_backward_and_self_jumps() {
        let mut label = Label::new(false);
        label.bind(4).unwrap();
        assert_eq!(
            label.jump_operand_for(4),
            Err(AsmError::PolicyViolation { site: 4, target: 4 })
        );
        assert_eq!(
            label.jump_operand_for(10),
            Err(AsmError::PolicyViolation { site: 10, target: 4 })
        );
        assert_eq!(label.jump_operand_for(1).unwrap(), 3);
    }

    #[test]
    fn backward_label_allows_non_positive_displacement() {
        let mut label = Label::backward();
        label.bind(2).unwrap();
        assert_eq!(label.jump_operand_for(2).unwrap(), 0);
        assert_eq!(label.jump_operand_for(7).unwrap(), -5);
    }

    #[test]
    fn double_bind_is_rejected() {
        let mut label = Label::new(true);
        label.bind(1).unwrap();
        assert_eq!(label.bind(2), Err(AsmError::DoubleBind { offset: 1 }));
        assert_eq!(label.offset(), Some(1));
    }
}

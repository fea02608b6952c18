use crate::error::{CilError, Result};
use eyre::eyre;
use fp_core::lir::{LirInstruction, MethodBody, TempId, TempStorage, VariableId};

/// Which temps get a durable local slot.
///
/// A temp stays unmaterialized only when it is defined by a `Compare`, used
/// exactly once, and that use is a conditional branch after the definition.
/// The branch then re-derives the comparison instead of loading a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempAnalysis {
    materialized: Vec<bool>,
    def_sites: Vec<Option<usize>>,
    branch_uses: Vec<u32>,
    other_uses: Vec<u32>,
}

impl TempAnalysis {
    pub fn analyze(body: &MethodBody, fuse_branches: bool) -> Result<Self> {
        let count = body.temps.len();
        let mut analysis = TempAnalysis {
            materialized: vec![true; count],
            def_sites: vec![None; count],
            branch_uses: vec![0; count],
            other_uses: vec![0; count],
        };
        let mut branch_site: Vec<Option<usize>> = vec![None; count];

        for (index, instruction) in body.instructions.iter().enumerate() {
            if let Some(result) = instruction.result() {
                let slot = analysis.slot(result)?;
                let is_variable = matches!(body.temp(result), Some(TempStorage::Variable(_)));
                match analysis.def_sites[slot] {
                    Some(previous) if !is_variable => {
                        return Err(CilError::Internal(eyre!(
                            "temp {} defined at LIR {} and again at LIR {} ({})",
                            result,
                            previous,
                            index,
                            instruction.kind_name()
                        )));
                    }
                    Some(_) => {}
                    None => analysis.def_sites[slot] = Some(index),
                }
            }

            let condition = instruction.branch_condition();
            for temp in instruction.uses() {
                let slot = analysis.slot(temp)?;
                if Some(temp) == condition {
                    analysis.branch_uses[slot] += 1;
                    branch_site[slot] = Some(index);
                } else {
                    analysis.other_uses[slot] += 1;
                }
            }
        }

        if !fuse_branches {
            return Ok(analysis);
        }

        for slot in 0..count {
            if analysis.branch_uses[slot] != 1 || analysis.other_uses[slot] != 0 {
                continue;
            }
            if matches!(body.temps[slot], TempStorage::Variable(_)) {
                continue;
            }
            let (Some(def), Some(branch)) = (analysis.def_sites[slot], branch_site[slot]) else {
                continue;
            };
            let LirInstruction::Compare { left, right, .. } = &body.instructions[def] else {
                continue;
            };
            if branch < def {
                continue;
            }
            // Re-deriving the comparison at the branch reads its operands again.
            // A write through any temp aliasing an operand's variable counts.
            let rewritten = body.instructions[def + 1..branch].iter().any(|between| {
                between
                    .result()
                    .is_some_and(|written| writes_operand(body, written, *left, *right))
            });
            if rewritten {
                continue;
            }
            analysis.materialized[slot] = false;
        }
        Ok(analysis)
    }

    fn slot(&self, temp: TempId) -> Result<usize> {
        if temp.index() < self.materialized.len() {
            Ok(temp.index())
        } else {
            Err(CilError::MissingMaterialization { temp })
        }
    }

    pub fn is_materialized(&self, temp: TempId) -> Result<bool> {
        self.slot(temp).map(|slot| self.materialized[slot])
    }

    pub fn def_site(&self, temp: TempId) -> Option<usize> {
        self.def_sites.get(temp.index()).copied().flatten()
    }

    pub fn use_count(&self, temp: TempId) -> u32 {
        let slot = temp.index();
        self.branch_uses.get(slot).copied().unwrap_or(0)
            + self.other_uses.get(slot).copied().unwrap_or(0)
    }

    pub fn materialized_count(&self) -> usize {
        self.materialized.iter().filter(|flag| **flag).count()
    }

    pub fn unmaterialized(&self) -> impl Iterator<Item = TempId> + '_ {
        self.materialized
            .iter()
            .enumerate()
            .filter(|(_, flag)| !**flag)
            .map(|(slot, _)| TempId(slot as u32))
    }
}

fn backing_variable(body: &MethodBody, temp: TempId) -> Option<VariableId> {
    match body.temp(temp) {
        Some(TempStorage::Variable(variable)) => Some(*variable),
        _ => None,
    }
}

fn writes_operand(body: &MethodBody, written: TempId, left: TempId, right: TempId) -> bool {
    if written == left || written == right {
        return true;
    }
    let Some(variable) = backing_variable(body, written) else {
        return false;
    };
    [left, right]
        .into_iter()
        .any(|operand| backing_variable(body, operand) == Some(variable))
}

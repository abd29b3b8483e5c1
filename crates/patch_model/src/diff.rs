//! JSON diff: emit an RFC 6902 patch transforming one value into another.
//!
//! Object diffs are deterministic: removed keys first, then added keys, then
//! changed keys, each group in sorted key order, recursing into shared
//! container keys. Array diffs use an LCS edit script with a cell-count
//! guardrail; oversized arrays fall back to one atomic `replace` of the
//! whole array. The emitted patch is sequential: indices are valid against
//! the evolving document, so `apply_patch(base, diff(base, next)) == next`.

use crate::op::PatchOp;
use crate::pointer::Pointer;
use serde_json::Value;

/// How array changes are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ArrayStrategy {
    /// Index-level remove/add/replace ops from an LCS alignment (default).
    #[default]
    Lcs,
    /// One `replace` of the whole array.
    Atomic,
}

/// Options for [`diff`].
#[derive(Clone, Debug)]
pub struct DiffOptions {
    /// Array rendering strategy.
    pub array_strategy: ArrayStrategy,
    /// Upper bound on the LCS table size `(base_len + 1) * (next_len + 1)`;
    /// larger arrays are replaced atomically.
    pub lcs_max_cells: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            array_strategy: ArrayStrategy::Lcs,
            lcs_max_cells: 250_000,
        }
    }
}

/// Compute a patch that transforms `base` into `next`.
pub fn diff(base: &Value, next: &Value, opts: &DiffOptions) -> Vec<PatchOp> {
    let mut out = Vec::new();
    let mut stack: Vec<(&Value, &Value, Pointer)> = vec![(base, next, Pointer::root())];

    while let Some((base, next, path)) = stack.pop() {
        if base == next {
            continue;
        }
        match (base, next) {
            (Value::Object(b), Value::Object(n)) => {
                // Removed keys, sorted (serde_json maps iterate sorted).
                for key in b.keys().filter(|k| !n.contains_key(*k)) {
                    out.push(PatchOp::Remove {
                        path: path.child(key).to_string(),
                    });
                }
                // Added keys, sorted.
                for (key, value) in n.iter().filter(|(k, _)| !b.contains_key(*k)) {
                    out.push(PatchOp::Add {
                        path: path.child(key).to_string(),
                        value: value.clone(),
                    });
                }
                // Shared keys recurse in sorted order; reversed so the LIFO
                // stack pops them forward.
                for (key, b_val) in b.iter().rev() {
                    if let Some(n_val) = n.get(key) {
                        stack.push((b_val, n_val, path.child(key)));
                    }
                }
            }
            (Value::Array(b), Value::Array(n)) => {
                diff_array(b, n, next, &path, opts, &mut out);
            }
            _ => {
                // Primitive change or type change: replace the slot.
                out.push(PatchOp::Replace {
                    path: path.to_string(),
                    value: next.clone(),
                });
            }
        }
    }
    out
}

/// One step of the LCS edit script over the trimmed window.
enum Edit {
    Keep,
    Del,
    Ins(usize),
}

fn diff_array(
    base: &[Value],
    next: &[Value],
    next_whole: &Value,
    path: &Pointer,
    opts: &DiffOptions,
    out: &mut Vec<PatchOp>,
) {
    let atomic = || PatchOp::Replace {
        path: path.to_string(),
        value: next_whole.clone(),
    };

    if opts.array_strategy == ArrayStrategy::Atomic {
        out.push(atomic());
        return;
    }
    // The guardrail is checked against the untrimmed dimensions: a single
    // changed cell in a huge array must still fall back.
    let cells = (base.len() + 1).saturating_mul(next.len() + 1);
    if cells > opts.lcs_max_cells {
        out.push(atomic());
        return;
    }

    // Trim the equal prefix and suffix.
    let max_trim = base.len().min(next.len());
    let mut prefix = 0;
    while prefix < max_trim && base[prefix] == next[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < max_trim - prefix
        && base[base.len() - 1 - suffix] == next[next.len() - 1 - suffix]
    {
        suffix += 1;
    }
    let bw = &base[prefix..base.len() - suffix];
    let nw = &next[prefix..next.len() - suffix];

    let script = lcs_script(bw, nw);

    // Emit with indices valid against the evolving array.
    let mut pos = prefix;
    let mut i = 0; // cursor into the edit script
    while i < script.len() {
        match script[i] {
            Edit::Keep => {
                pos += 1;
                i += 1;
            }
            Edit::Del => {
                // A deletion aligned with an insertion is a substitution.
                if let Some(Edit::Ins(j)) = script.get(i + 1) {
                    out.push(PatchOp::Replace {
                        path: path.child(&pos.to_string()).to_string(),
                        value: nw[*j].clone(),
                    });
                    pos += 1;
                    i += 2;
                } else {
                    out.push(PatchOp::Remove {
                        path: path.child(&pos.to_string()).to_string(),
                    });
                    i += 1;
                }
            }
            Edit::Ins(j) => {
                out.push(PatchOp::Add {
                    path: path.child(&pos.to_string()).to_string(),
                    value: nw[j].clone(),
                });
                pos += 1;
                i += 1;
            }
        }
    }
}

/// Classic LCS table + backtrack. Deterministic: on ties the deletion is
/// preferred, so identical inputs always yield the identical script.
fn lcs_script(bw: &[Value], nw: &[Value]) -> Vec<Edit> {
    let m = bw.len();
    let n = nw.len();
    let mut dp = vec![0u32; (m + 1) * (n + 1)];
    let at = |i: usize, j: usize| i * (n + 1) + j;
    for i in 1..=m {
        for j in 1..=n {
            dp[at(i, j)] = if bw[i - 1] == nw[j - 1] {
                dp[at(i - 1, j - 1)] + 1
            } else {
                dp[at(i - 1, j)].max(dp[at(i, j - 1)])
            };
        }
    }

    let mut script = Vec::with_capacity(m + n);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if bw[i - 1] == nw[j - 1] {
            script.push(Edit::Keep);
            i -= 1;
            j -= 1;
        } else if dp[at(i - 1, j)] >= dp[at(i, j - 1)] {
            script.push(Edit::Del);
            i -= 1;
        } else {
            script.push(Edit::Ins(j - 1));
            j -= 1;
        }
    }
    while i > 0 {
        script.push(Edit::Del);
        i -= 1;
    }
    while j > 0 {
        script.push(Edit::Ins(j - 1));
        j -= 1;
    }
    script.reverse();
    script
}

//! Incremental error filtering: report only the checker output lines that are
//! new relative to a run against the previous source tree.
//!
//! The alignment is a longest-matching-block line diff. Whitespace-only lines
//! are junk: they never anchor a match, so noise like trailing blank lines
//! cannot shift how real findings line up between the two runs.

use std::collections::{HashMap, HashSet};

/// Sequences at least this long get popular-element pruning.
const AUTOJUNK_MIN_LEN: usize = 200;

/// Classification of an aligned region between two line sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    Equal,
    Replace,
    Delete,
    Insert,
}

/// One aligned region: `old[old_start..old_end]` vs `new[new_start..new_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub tag: OpTag,
    pub old_start: usize,
    pub old_end: usize,
    pub new_start: usize,
    pub new_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Block {
    old: usize,
    new: usize,
    size: usize,
}

/// Longest-matching-block aligner over two line sequences.
pub struct LineMatcher<'a> {
    old: &'a [&'a str],
    new: &'a [&'a str],
    /// Positions of each non-junk, non-popular line in `new`.
    new_index: HashMap<&'a str, Vec<usize>>,
    junk: HashSet<&'a str>,
}

impl<'a> LineMatcher<'a> {
    pub fn new(old: &'a [&'a str], new: &'a [&'a str], is_junk: impl Fn(&str) -> bool) -> Self {
        let mut new_index: HashMap<&'a str, Vec<usize>> = HashMap::new();
        for (idx, line) in new.iter().enumerate() {
            new_index.entry(*line).or_default().push(idx);
        }

        let junk: HashSet<&'a str> = new_index
            .keys()
            .copied()
            .filter(|&line| is_junk(line))
            .collect();
        new_index.retain(|line, _| !junk.contains(line));

        if new.len() >= AUTOJUNK_MIN_LEN {
            let threshold = new.len() / 100 + 1;
            new_index.retain(|_, positions| positions.len() <= threshold);
        }

        Self {
            old,
            new,
            new_index,
            junk,
        }
    }

    fn is_junk(&self, line: &str) -> bool {
        self.junk.contains(line)
    }

    /// Longest block of equal lines inside the given windows.
    ///
    /// Ties resolve to the earliest start in `old`, then in `new`. The core match
    /// contains no junk; it is then widened with adjacent equal lines, non-junk
    /// first and junk second.
    fn longest_match(&self, old_lo: usize, old_hi: usize, new_lo: usize, new_hi: usize) -> Block {
        let mut best = Block {
            old: old_lo,
            new: new_lo,
            size: 0,
        };
        let mut run_lengths: HashMap<usize, usize> = HashMap::new();
        for i in old_lo..old_hi {
            let mut next_lengths: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.new_index.get(self.old[i]) {
                for &j in positions {
                    if j < new_lo {
                        continue;
                    }
                    if j >= new_hi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| run_lengths.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next_lengths.insert(j, k);
                    if k > best.size {
                        best = Block {
                            old: i + 1 - k,
                            new: j + 1 - k,
                            size: k,
                        };
                    }
                }
            }
            run_lengths = next_lengths;
        }

        for junk_pass in [false, true] {
            while best.old > old_lo
                && best.new > new_lo
                && self.is_junk(self.new[best.new - 1]) == junk_pass
                && self.old[best.old - 1] == self.new[best.new - 1]
            {
                best.old -= 1;
                best.new -= 1;
                best.size += 1;
            }
            while best.old + best.size < old_hi
                && best.new + best.size < new_hi
                && self.is_junk(self.new[best.new + best.size]) == junk_pass
                && self.old[best.old + best.size] == self.new[best.new + best.size]
            {
                best.size += 1;
            }
        }
        best
    }

    fn matching_blocks(&self) -> Vec<Block> {
        let mut pending = vec![(0, self.old.len(), 0, self.new.len())];
        let mut found = Vec::new();
        while let Some((old_lo, old_hi, new_lo, new_hi)) = pending.pop() {
            let block = self.longest_match(old_lo, old_hi, new_lo, new_hi);
            if block.size == 0 {
                continue;
            }
            if old_lo < block.old && new_lo < block.new {
                pending.push((old_lo, block.old, new_lo, block.new));
            }
            if block.old + block.size < old_hi && block.new + block.size < new_hi {
                pending.push((block.old + block.size, old_hi, block.new + block.size, new_hi));
            }
            found.push(block);
        }
        found.sort();

        let mut merged: Vec<Block> = Vec::with_capacity(found.len() + 1);
        for block in found {
            match merged.last_mut() {
                Some(last) if last.old + last.size == block.old && last.new + last.size == block.new => {
                    last.size += block.size;
                }
                _ => merged.push(block),
            }
        }
        merged.push(Block {
            old: self.old.len(),
            new: self.new.len(),
            size: 0,
        });
        merged
    }

    /// Regions transforming `old` into `new`, in order.
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let (mut i, mut j) = (0, 0);
        for block in self.matching_blocks() {
            let tag = match (i < block.old, j < block.new) {
                (true, true) => Some(OpTag::Replace),
                (true, false) => Some(OpTag::Delete),
                (false, true) => Some(OpTag::Insert),
                (false, false) => None,
            };
            if let Some(tag) = tag {
                ops.push(Opcode {
                    tag,
                    old_start: i,
                    old_end: block.old,
                    new_start: j,
                    new_end: block.new,
                });
            }
            i = block.old + block.size;
            j = block.new + block.size;
            if block.size > 0 {
                ops.push(Opcode {
                    tag: OpTag::Equal,
                    old_start: block.old,
                    old_end: i,
                    new_start: block.new,
                    new_end: j,
                });
            }
        }
        ops
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Lines of `new_output` that have no stable counterpart in `old_output`.
///
/// An empty `old_output` means there is nothing to compare against and the
/// whole `new_output` is returned verbatim. Otherwise inserted and replaced
/// lines are collected and joined with `\n`; blank lines are not reported.
/// An empty result means no new findings.
pub fn filter_new(old_output: &str, new_output: &str) -> String {
    if old_output.is_empty() {
        return new_output.to_string();
    }

    let old_lines: Vec<&str> = old_output.split('\n').collect();
    let new_lines: Vec<&str> = new_output.split('\n').collect();
    let matcher = LineMatcher::new(&old_lines, &new_lines, is_blank);

    let added: Vec<&str> = matcher
        .opcodes()
        .into_iter()
        .filter(|op| matches!(op.tag, OpTag::Insert | OpTag::Replace))
        .flat_map(|op| new_lines[op.new_start..op.new_end].iter().copied())
        .filter(|line| !is_blank(line))
        .collect();
    added.join("\n")
}

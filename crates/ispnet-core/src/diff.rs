// Line diff for configuration exports.
//
// RouterOS prefixes every export with a `# <date> by RouterOS <version>`
// comment block; it changes on every export and is ignored here.

use crate::model::{DiffLine, DiffTag};

/// Middle sections larger than this (in LCS cells) are diffed as a
/// wholesale replace.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Line-based LCS diff of `old` → `new`. Unchanged lines are returned as
/// context, so concatenating context + added lines rebuilds `new`.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let old = body_lines(old);
    let new = body_lines(new);

    let prefix = old
        .iter()
        .zip(&new)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = Vec::with_capacity(old.len().max(new.len()));
    out.extend(old[..prefix].iter().map(|l| line(DiffTag::Context, l)));
    diff_middle(
        &old[prefix..old.len() - suffix],
        &new[prefix..new.len() - suffix],
        &mut out,
    );
    out.extend(
        old[old.len() - suffix..]
            .iter()
            .map(|l| line(DiffTag::Context, l)),
    );
    out
}

/// Export lines without the leading `#` header block and trailing blanks.
fn body_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .skip_while(|l| l.starts_with('#'))
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

fn line(tag: DiffTag, text: &str) -> DiffLine {
    DiffLine {
        tag,
        text: text.to_owned(),
    }
}

fn diff_middle(old: &[&str], new: &[&str], out: &mut Vec<DiffLine>) {
    let (n, m) = (old.len(), new.len());
    if n == 0 || m == 0 || n.saturating_mul(m) > MAX_LCS_CELLS {
        out.extend(old.iter().map(|l| line(DiffTag::Removed, l)));
        out.extend(new.iter().map(|l| line(DiffTag::Added, l)));
        return;
    }

    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if old[i] == new[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(line(DiffTag::Context, old[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            out.push(line(DiffTag::Removed, old[i]));
            i += 1;
        } else {
            out.push(line(DiffTag::Added, new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| line(DiffTag::Removed, l)));
    out.extend(new[j..].iter().map(|l| line(DiffTag::Added, l)));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn changes(diff: &[DiffLine]) -> Vec<(DiffTag, &str)> {
        diff.iter()
            .filter(|l| l.is_change())
            .map(|l| (l.tag, l.text.as_str()))
            .collect()
    }

    #[test]
    fn header_only_difference_is_empty() {
        let a = "# jan/02/2025 10:00:00 by RouterOS 7.16\n# software id = ABCD\n/ip pool\nadd name=dhcp\n";
        let b = "# feb/03/2025 11:30:00 by RouterOS 7.16\n# software id = ABCD\n/ip pool\nadd name=dhcp\n";
        assert!(changes(&diff_lines(a, b)).is_empty());
    }

    #[test]
    fn reports_changed_line() {
        let a = "/ppp secret\nadd name=alice profile=10M\nadd name=bob profile=10M\n";
        let b = "/ppp secret\nadd name=alice profile=20M\nadd name=bob profile=10M\nadd name=carol\n";
        assert_eq!(
            changes(&diff_lines(a, b)),
            vec![
                (DiffTag::Removed, "add name=alice profile=10M"),
                (DiffTag::Added, "add name=alice profile=20M"),
                (DiffTag::Added, "add name=carol"),
            ]
        );
    }

    #[test]
    fn context_and_additions_rebuild_new() {
        let a = "a\nb\nc\nd\n";
        let b = "a\nx\nc\ny\nd\n";
        let rebuilt: Vec<_> = diff_lines(a, b)
            .into_iter()
            .filter(|l| l.tag != DiffTag::Removed)
            .map(|l| l.text)
            .collect();
        assert_eq!(rebuilt, vec!["a", "x", "c", "y", "d"]);
    }
}

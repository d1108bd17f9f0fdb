// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tokenizer for multi-valued template results.
//!
//! Items are separated by `,`. The sequence ` : ` separates groups: it never
//! belongs to an item and never starts one. A group may open with a label
//! (`"status : 200,404"`); a label is the first token of a group terminated by
//! ` : ` and is dropped. Leading spaces are skipped, one trailing space is
//! trimmed and a lone `-` stands for an empty item.

const GROUP_DELIMITER: &[u8] = b" : ";

/// Iterator over the items of a compound string.
#[derive(Clone, Debug)]
pub struct Parts<'a> {
    src: &'a str,
    pos: usize,
    first_in_group: bool,
}

#[must_use]
pub fn split(src: &str) -> Parts<'_> {
    Parts {
        src,
        pos: 0,
        first_in_group: true,
    }
}

/// Values that never produce a dimension.
#[must_use]
pub fn is_empty_dimension(value: &str) -> bool {
    matches!(value, "" | "0" | "-")
}

impl<'a> Parts<'a> {
    fn is_delimiter(&self, at: usize) -> bool {
        self.src.as_bytes()[at..].starts_with(GROUP_DELIMITER)
    }

    fn skip_separators(&mut self, mut at: usize) -> usize {
        let bytes = self.src.as_bytes();
        loop {
            if self.is_delimiter(at) {
                at += GROUP_DELIMITER.len();
                self.first_in_group = true;
            } else if at < bytes.len() && bytes[at] == b' ' {
                at += 1;
            } else {
                return at;
            }
        }
    }
}

impl<'a> Iterator for Parts<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.src.as_bytes();
        loop {
            let start = self.skip_separators(self.pos);
            if start >= bytes.len() {
                self.pos = bytes.len();
                return None;
            }

            let mut at = start;
            while at < bytes.len() && bytes[at] != b',' && !self.is_delimiter(at) {
                at += 1;
            }

            let mut end = at;
            let closes_label = at < bytes.len() && bytes[at] != b',' && self.first_in_group;
            if at < bytes.len() && bytes[at] == b',' {
                at += 1;
            }
            if end > start && bytes[end - 1] == b' ' {
                end -= 1;
            }

            self.first_in_group = false;
            self.pos = self.skip_separators(at);

            if closes_label {
                continue;
            }

            let item = &self.src[start..end];
            if item.is_empty() && self.pos >= bytes.len() {
                return None;
            }
            return Some(if item == "-" { "" } else { item });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn items(s: &str) -> Vec<&str> {
        split(s).collect()
    }

    #[test]
    fn test_split_simple() {
        assert_eq!(items("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(items("100"), vec!["100"]);
        assert_eq!(items(""), Vec::<&str>::new());
    }

    #[test]
    fn test_split_trims_spaces() {
        assert_eq!(items("  a, b ,c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_dash_is_empty() {
        assert_eq!(items("a,-,b"), vec!["a", "", "b"]);
        assert_eq!(items("-"), vec![""]);
    }

    #[test]
    fn test_split_keeps_inner_empty_items() {
        assert_eq!(items("a,,b"), vec!["a", "", "b"]);
        assert_eq!(items(",a"), vec!["", "a"]);
    }

    #[test]
    fn test_split_trailing_separator_yields_nothing() {
        assert_eq!(items("a,"), vec!["a"]);
        assert_eq!(items("a, "), vec!["a"]);
    }

    #[test]
    fn test_split_group_label_is_dropped() {
        assert_eq!(items("x : a,b"), vec!["a", "b"]);
        assert_eq!(items(" : a"), vec!["a"]);
        assert_eq!(items("x : "), Vec::<&str>::new());
    }

    #[test]
    fn test_split_group_boundary_ends_item() {
        assert_eq!(items("a,b : c"), vec!["a", "b", "c"]);
        assert_eq!(items("a : b,c"), vec!["b", "c"]);
        assert_eq!(items("s1 : a,b : s2 : c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_colon_without_spaces_is_text() {
        assert_eq!(items("host:80,host:81"), vec!["host:80", "host:81"]);
    }

    #[test]
    fn test_is_empty_dimension() {
        assert!(is_empty_dimension(""));
        assert!(is_empty_dimension("0"));
        assert!(is_empty_dimension("-"));
        assert!(!is_empty_dimension("00"));
        assert!(!is_empty_dimension("200"));
    }

    proptest! {
        #[test]
        fn test_items_never_contain_separators(s in "[a-c0-9 ,:-]{0,40}") {
            let boundaries = s.matches(',').count() + s.matches(':').count();
            let parts: Vec<&str> = split(&s).collect();
            prop_assert!(parts.len() <= boundaries + 1);
            for part in parts {
                prop_assert!(!part.contains(','));
                prop_assert!(!part.contains(" : "));
                prop_assert!(!part.starts_with(' '));
            }
        }
    }
}

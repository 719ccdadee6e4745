//! Where to put a flag appended to an existing flag list
//!
//! New flags go into the sorted tail of the list. Wildcard flags are
//! boundaries: a flag is never moved in front of a wildcard, since that
//! would let the wildcard override it.

use crate::matcher::is_wildcard_flag;
use crate::package_file::Flag;

/// Index at which `new_flag` should be inserted into `flags`
pub fn insertion_index(flags: &[Flag], new_flag: &Flag) -> usize {
    // a bare `*` always goes last
    if new_flag.name == "*" {
        return flags.len();
    }

    let mut index = flags.len();
    while index > 0 {
        let prev = &flags[index - 1];
        if is_wildcard_flag(&prev.name) || prev.name <= new_flag.name {
            break;
        }
        // stop where the list stops being sorted
        if let Some(next) = flags.get(index) {
            if prev.name > next.name {
                break;
            }
        }
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(names: &[&str]) -> Vec<Flag> {
        names.iter().map(|n| Flag::parse(n).unwrap()).collect()
    }

    fn insert_sorted(list: &mut Vec<Flag>, flag: Flag) {
        let index = insertion_index(list, &flag);
        list.insert(index, flag);
    }

    fn names(flags: &[Flag]) -> Vec<String> {
        flags.iter().map(Flag::to_string).collect()
    }

    #[test]
    fn test_insert_into_sorted_list() {
        let mut list = flags(&["a", "c", "e"]);
        insert_sorted(&mut list, Flag::enabled("b"));
        assert_eq!(names(&list), vec!["a", "b", "c", "e"]);
    }

    #[test]
    fn test_wildcard_is_a_boundary() {
        let mut list = flags(&["b", "*", "c"]);
        insert_sorted(&mut list, Flag::enabled("b"));
        assert_eq!(names(&list), vec!["b", "*", "b", "c"]);
    }

    #[test]
    fn test_prefix_wildcard_is_a_boundary() {
        let mut list = flags(&["-foo_*", "foo_z"]);
        insert_sorted(&mut list, Flag::enabled("foo_a"));
        assert_eq!(names(&list), vec!["-foo_*", "foo_a", "foo_z"]);
    }

    #[test]
    fn test_modifier_is_ignored() {
        let mut list = flags(&["-a", "-c"]);
        insert_sorted(&mut list, Flag::disabled("b"));
        assert_eq!(names(&list), vec!["-a", "-b", "-c"]);
    }

    #[test]
    fn test_unsorted_prefix_is_left_alone() {
        let mut list = flags(&["z", "c"]);
        insert_sorted(&mut list, Flag::enabled("b"));
        assert_eq!(names(&list), vec!["z", "b", "c"]);
    }

    #[test]
    fn test_bare_star_goes_last() {
        let mut list = flags(&["a", "z"]);
        insert_sorted(&mut list, Flag::disabled("*"));
        assert_eq!(names(&list), vec!["a", "z", "-*"]);
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(insertion_index(&[], &Flag::enabled("x")), 0);
    }
}

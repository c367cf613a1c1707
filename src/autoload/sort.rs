//! Package ordering and dev-package filtering.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::package::Package;

/// How packages installed only for development are left out.
#[derive(Debug, Clone, Copy, Default)]
pub enum DevFilter<'a> {
    /// Keep everything.
    #[default]
    Keep,
    /// Drop packages with these names.
    Names(&'a [String]),
    /// Keep only packages reachable from the root's non-dev requirements.
    Reachable,
}

/// Apply `filter` to the dependencies of `root`.
pub fn filter_dev_packages<'p>(
    packages: Vec<&'p Package>,
    root: &Package,
    filter: DevFilter<'_>,
) -> Vec<&'p Package> {
    match filter {
        DevFilter::Keep => packages,
        DevFilter::Names(names) => {
            let dev: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
            packages
                .into_iter()
                .filter(|p| !dev.contains(&p.key()))
                .collect()
        }
        DevFilter::Reachable => {
            let included = reachable_names(&packages, root);
            packages
                .into_iter()
                .filter(|p| p.names().any(|n| included.contains(&n)))
                .collect()
        }
    }
}

/// Names required, directly or not, by the root's regular requirements. A
/// requirement on a replaced name counts as one on its replacer.
fn reachable_names(packages: &[&Package], root: &Package) -> HashSet<String> {
    let by_name: HashMap<String, &Package> = packages.iter().map(|p| (p.key(), *p)).collect();
    let replaced_by: HashMap<String, String> = packages
        .iter()
        .flat_map(|p| p.replace.iter().map(move |r| (r.to_lowercase(), p.key())))
        .collect();

    let mut included = HashSet::new();
    let mut pending: Vec<&Package> = vec![root];
    while let Some(package) = pending.pop() {
        for target in &package.require {
            let mut target = target.to_lowercase();
            if let Some(replacer) = replaced_by.get(&target) {
                target = replacer.clone();
            }
            if included.insert(target.clone()) {
                if let Some(&dep) = by_name.get(&target) {
                    pending.push(dep);
                }
            }
        }
    }
    included
}

/// Order packages so that the most depended-upon come first.
///
/// Each package weighs the sum over its users of `-(1 - weight(user))`;
/// cycles contribute nothing. Lighter packages sort first, ties are broken by
/// case-insensitive natural name order. Only packages in the slice count as
/// users; when `root` is among them its dev requirements count too.
pub fn sort_packages<'p>(packages: &[&'p Package], root: Option<&Package>) -> Vec<&'p Package> {
    let aliases: HashMap<String, String> = packages
        .iter()
        .flat_map(|p| {
            p.provide
                .iter()
                .chain(&p.replace)
                .map(move |n| (n.to_lowercase(), p.key()))
        })
        .collect();

    let mut usage: HashMap<String, Vec<String>> = HashMap::new();
    for package in packages {
        let is_root = root.is_some_and(|r| r.key() == package.key());
        let links = package
            .require
            .iter()
            .chain(package.require_dev.iter().filter(|_| is_root));
        for link in links {
            let target = link.to_lowercase();
            let target = aliases.get(&target).cloned().unwrap_or(target);
            usage.entry(target).or_default().push(package.key());
        }
    }

    let mut weights = Weights {
        usage: &usage,
        computing: HashSet::new(),
        computed: HashMap::new(),
    };
    let mut weighted: Vec<(i64, &'p Package)> = packages
        .iter()
        .map(|p| (weights.importance(&p.key()), *p))
        .collect();

    weighted.sort_by(|(wa, a), (wb, b)| {
        wa.cmp(wb)
            .then_with(|| natural_cmp_ignore_case(&a.name, &b.name))
    });
    weighted.into_iter().map(|(_, p)| p).collect()
}

struct Weights<'u> {
    usage: &'u HashMap<String, Vec<String>>,
    computing: HashSet<String>,
    computed: HashMap<String, i64>,
}

impl Weights<'_> {
    fn importance(&mut self, name: &str) -> i64 {
        if let Some(&weight) = self.computed.get(name) {
            return weight;
        }
        if !self.computing.insert(name.to_string()) {
            return 0;
        }

        let mut weight: i64 = 0;
        if let Some(users) = self.usage.get(name) {
            for user in users {
                let user_weight = self.importance(user);
                weight = weight.saturating_sub(1i64.saturating_sub(user_weight));
            }
        }

        self.computing.remove(name);
        self.computed.insert(name.to_string(), weight);
        weight
    }
}

/// Case-insensitive comparison treating digit runs as numbers.
pub(crate) fn natural_cmp_ignore_case(a: &str, b: &str) -> Ordering {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let mut ia = a.chars().peekable();
    let mut ib = b.chars().peekable();

    loop {
        match (ia.peek().copied(), ib.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_number(&mut ia);
                let nb = take_number(&mut ib);
                let ord = na
                    .trim_start_matches('0')
                    .len()
                    .cmp(&nb.trim_start_matches('0').len())
                    .then_with(|| na.trim_start_matches('0').cmp(nb.trim_start_matches('0')));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ia.next();
                ib.next();
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(packages: &[&Package]) -> Vec<String> {
        packages.iter().map(|p| p.name.clone()).collect()
    }

    #[test]
    fn dependencies_sort_before_their_users() {
        let c = Package::new("c/c");
        let d = Package::new("d/d").requiring(["c/c"]);
        let b = Package::new("b/b").requiring(["c/c", "d/d"]);
        let e = Package::new("e/e").requiring(["c/c"]);
        let z = Package::new("z/z");
        let root = Package::new("root/root").requiring(["b/b", "d/d", "e/e", "z/z"]);

        let all = [&b, &z, &root, &e, &d, &c];
        let sorted = sort_packages(&all, Some(&root));
        assert_eq!(
            names(&sorted),
            vec!["c/c", "d/d", "b/b", "e/e", "z/z", "root/root"]
        );
    }

    #[test]
    fn root_outside_the_slice_adds_no_weight() {
        let j = Package::new("j/j");
        let l = Package::new("l/l").requiring(["j/j"]);
        let k = Package::new("k/k").requiring(["l/l"]);
        let m = Package::new("m/m").requiring(["p/p"]);
        let n = Package::new("n/n").requiring(["p/p"]);
        let p = Package::new("p/p");
        let root = Package::new("root/root").requiring(["k/k", "m/m", "n/n"]);

        let sorted = sort_packages(&[&n, &m, &l, &k, &p, &j], Some(&root));
        assert_eq!(
            names(&sorted),
            vec!["j/j", "p/p", "l/l", "k/k", "m/m", "n/n"]
        );
    }

    #[test]
    fn root_dev_requirements_count_as_uses() {
        let a = Package::new("a/a");
        let b = Package::new("b/b");
        let mut root = Package::new("root/root").requiring(["a/a"]);
        root.require_dev.push("b/b".into());
        root.require_dev.push("a/a".into());

        let sorted = sort_packages(&[&b, &a, &root], Some(&root));
        assert_eq!(names(&sorted), vec!["a/a", "b/b", "root/root"]);
    }

    #[test]
    fn cycles_terminate() {
        let a = Package::new("a/a").requiring(["b/b"]);
        let b = Package::new("b/b").requiring(["a/a"]);
        let sorted = sort_packages(&[&a, &b], None);
        assert_eq!(sorted.len(), 2);
    }

    #[test]
    fn requirement_on_replaced_name_weighs_the_replacer() {
        let mut full = Package::new("acme/full");
        full.replace.push("acme/part".into());
        let user = Package::new("x/user").requiring(["acme/part"]);
        let aaa = Package::new("a/unused");

        let sorted = sort_packages(&[&aaa, &user, &full], None);
        assert_eq!(names(&sorted)[0], "acme/full");
    }

    #[test]
    fn natural_order_ignores_case_and_compares_numbers() {
        assert_eq!(natural_cmp_ignore_case("pkg/lib2", "pkg/lib10"), Ordering::Less);
        assert_eq!(natural_cmp_ignore_case("Acme/B", "acme/a"), Ordering::Greater);
        assert_eq!(natural_cmp_ignore_case("a/x", "A/X"), Ordering::Equal);
    }

    #[test]
    fn filter_by_dev_names() {
        let a = Package::new("a/a");
        let phpunit = Package::new("phpunit/phpunit");
        let root = Package::new("root/root");
        let names_list = vec!["PHPUnit/PHPUnit".to_string()];

        let kept = filter_dev_packages(vec![&a, &phpunit], &root, DevFilter::Names(&names_list));
        assert_eq!(names(&kept), vec!["a/a"]);
    }

    #[test]
    fn filter_by_reachability_follows_replacements() {
        let mut full = Package::new("acme/full").requiring(["psr/log"]);
        full.replace.push("acme/part".into());
        let log = Package::new("psr/log");
        let phpunit = Package::new("phpunit/phpunit").requiring(["sebastian/diff"]);
        let diff = Package::new("sebastian/diff");
        let mut root = Package::new("root/root").requiring(["acme/part"]);
        root.require_dev.push("phpunit/phpunit".into());

        let kept = filter_dev_packages(
            vec![&full, &log, &phpunit, &diff],
            &root,
            DevFilter::Reachable,
        );
        assert_eq!(names(&kept), vec!["acme/full", "psr/log"]);
    }
}

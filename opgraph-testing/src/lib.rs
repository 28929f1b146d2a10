//! Internal testing utilities for the opgraph crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Run table-driven tests.
///
/// A table-driven test declares a `Case` struct implementing `Debug`, builds
/// a collection of cases (conventionally named `cases`) and passes a test
/// function to [`test_each`](TestCases::test_each):
///
/// ```
/// use opgraph_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     rank: usize,
///     axis: i64,
///     expected: usize,
/// }
///
/// let cases = [
///     Case { rank: 4, axis: -1, expected: 3 },
///     Case { rank: 2, axis: 1, expected: 1 },
/// ];
///
/// cases.test_each(|&Case { rank, axis, expected }| {
///     let resolved = if axis < 0 { axis + rank as i64 } else { axis };
///     assert_eq!(resolved as usize, expected);
/// });
/// ```
///
/// Every case is run even if an earlier one fails. Panics are caught and
/// the failing cases are reported together in a single panic at the end.
///
/// Cases and any values captured by the test function must be unwind safe.
/// Values that are not, such as graphs holding closures in `Arc`s, should be
/// created inside the test function from plain data in the case.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case, catching panics.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes each case
    /// by clone.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Variant of [`test_each`](TestCases::test_each) which passes each case
    /// by value. The case is formatted before the call so that it can be
    /// reported if the test panics.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

fn report_failures<F: Debug>(failures: &[F]) {
    assert_eq!(
        failures.len(),
        0,
        "{} test cases failed: {:?}",
        failures.len(),
        failures
    );
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        report_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Clone + Debug + UnwindSafe,
    {
        let mut failures = Vec::new();
        for case in self {
            let value = case.clone();
            let test = &test;
            if std::panic::catch_unwind(move || test(value)).is_err() {
                failures.push(case);
            }
        }
        report_failures(&failures);
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe,
    {
        let mut failures = Vec::new();
        for case in self {
            let test = &test;
            let case_str = format!("{:?}", case);
            if std::panic::catch_unwind(move || test(case)).is_err() {
                failures.push(case_str);
            }
        }
        report_failures(&failures);
    }
}

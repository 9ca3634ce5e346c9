//! Profiling macros.

/// Starts measuring a profiled region in the specified [`Session`](crate::Session). Returns
/// a [`RegionGuard`](crate::RegionGuard); the region ends when the guard is dropped.
///
/// - `region!(session)` labels the region with the name of the enclosing function.
/// - `region!(session, name)` uses the specified name.
/// - `region!(session, name, bytes)` additionally records the number of processed bytes.
///
/// In all cases, the line of the macro call is used to distinguish regions with the same name.
///
/// # Examples
///
/// ```
/// use repprof::{region, Session};
///
/// fn checksum(session: &Session, data: &[u8]) -> u64 {
///     let _guard = region!(session, "checksum", data.len() as u64);
///     data.iter().map(|&byte| u64::from(byte)).sum()
/// }
///
/// fn run(session: &Session) {
///     let _guard = region!(session); // labeled as `run:<line>`
///     checksum(session, &[1, 2, 3]);
/// }
///
/// let session = Session::new().with_cpu_frequency(1_000_000_000);
/// run(&session);
/// let labels: Vec<_> = session.store().iter().map(|(label, _)| label.to_owned()).collect();
/// assert!(labels[0].starts_with("run:"));
/// assert!(labels[1].starts_with("checksum:"));
/// ```
#[macro_export]
macro_rules! region {
    ($session:expr) => {
        $session.region(
            $crate::RegionLabel::new($crate::__function_name!(), ::core::line!()),
            0,
        )
    };
    ($session:expr, $name:expr) => {
        $session.region($crate::RegionLabel::new($name, ::core::line!()), 0)
    };
    ($session:expr, $name:expr, $bytes:expr) => {
        $session.region($crate::RegionLabel::new($name, ::core::line!()), $bytes)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __function_name {
    () => {{
        fn f() {}
        $crate::__private::function_name(::core::any::type_name_of_val(&f))
    }};
}

/// Extracts the function name from the type name of a local item `f` defined in this function.
pub fn function_name(type_name: &'static str) -> &'static str {
    let mut path = type_name.strip_suffix("::f").unwrap_or(type_name);
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    path.rsplit("::").next().unwrap_or(path)
}

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use tracing::debug;

use crate::value::{NativeFn, Value, ValueKind};

/// Where `print` writes. Shared (not owned outright by one `NativeFn`
/// closure) so tests can swap in an in-memory buffer and assert on it
/// instead of scraping the process's real stdout.
pub type OutputSink = Rc<RefCell<dyn Write>>;

/// Formats a single argument the way `print` renders it: numbers and
/// strings via their natural `Display`, `Boolean` as `true`/`false`
/// (already how `Display for Value` renders it), anything with no direct
/// textual form as `<Kind>`.
fn format_arg(v: &Value) -> String {
    match v.kind() {
        ValueKind::Table | ValueKind::Function => format!("<{:?}>", v.kind()),
        _ => v.to_string(),
    }
}

/// `__ping()`: a diagnostic probe. Writes `pong` to stderr and always
/// returns `Nil` — a probe has no argument to echo back in the common case.
fn ping(_args: &[Value], _out: &mut Value) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "pong");
    debug!("__ping");
}

/// Every binding `Runtime::new`/`Runtime::with_output` seeds into the
/// outermost scope before executing a program. `output` is where `print`
/// writes its comma-joined, newline-terminated line.
pub fn builtins(output: OutputSink) -> Vec<(&'static str, Value)> {
    let print = move |args: &[Value], _out: &mut Value| {
        let rendered: Vec<String> = args.iter().map(format_arg).collect();
        let mut sink = output.borrow_mut();
        let _ = writeln!(sink, "{}", rendered.join(", "));
        debug!(argc = args.len(), "print");
    };

    vec![
        ("print", Value::Function(NativeFn::new(print))),
        ("__ping", Value::Function(NativeFn::new(ping))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_and_function_render_as_their_kind() {
        assert_eq!(format_arg(&Value::Table(Default::default())), "<Table>");
    }

    #[test]
    fn scalars_render_via_display() {
        assert_eq!(format_arg(&Value::Integer(3)), "3");
        assert_eq!(format_arg(&Value::Boolean(false)), "false");
        assert_eq!(format_arg(&Value::Real(3.5)), "3.5");
    }

    #[test]
    fn print_writes_a_comma_joined_newline_terminated_line() {
        let buf: OutputSink = Rc::new(RefCell::new(Vec::new()));
        let bound = builtins(buf.clone());
        let (_, print_fn) = bound.into_iter().find(|(name, _)| *name == "print").unwrap();
        let Value::Function(print_fn) = print_fn else {
            unreachable!()
        };
        let mut out = Value::Nil;
        print_fn.call(&[Value::Integer(1), Value::Boolean(true)], &mut out);
        let written = String::from_utf8(buf.borrow().clone()).unwrap();
        assert_eq!(written, "1, true\n");
    }
}

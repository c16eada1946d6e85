// Error rethrow enrichment

use boa_engine::{js_string, Context, JsError, JsNativeError, JsResult, JsString, JsValue};

/// Lines of context shown on each side of the failing line
const CONTEXT_LINES: usize = 3;

/// Script source of the rethrow routine, inlined into client functions
pub const RETHROW_SOURCE: &str = r#"function (err, str, filename, lineno) {
  var lines = str.split('\n');
  var start = Math.max(lineno - 4, 0);
  var end = Math.min(lines.length, lineno + 3);
  var context = lines.slice(start, end).map(function (line, i) {
    var curr = i + start + 1;
    return (curr == lineno ? ' >> ' : '    ') + curr + '| ' + line;
  }).join('\n');
  if (err == null || typeof err != 'object') err = new Error(String(err));
  if (err.path === undefined) {
    err.path = filename;
    err.line = lineno;
  }
  err.message = (filename || 'ejs') + ':' + lineno + '\n' + context + '\n\n' + err.message;
  throw err;
}"#;

/// Numbered source window around `lineno` (1-based), failing line marked `>>`
///
/// ```
/// use ejs::rethrow::context_window;
///
/// let window = context_window("a\nb\nc", 2);
/// assert_eq!(window, "    1| a\n >> 2| b\n    3| c");
/// ```
pub fn context_window(source: &str, lineno: usize) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let start = lineno.saturating_sub(CONTEXT_LINES + 1);
    let end = lines.len().min(lineno + CONTEXT_LINES);
    lines
        .get(start..end.max(start))
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let curr = i + start + 1;
            let marker = if curr == lineno { " >> " } else { "    " };
            format!("{}{}| {}", marker, curr, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full positioned message: `file:line`, the window, then the original message
pub fn enrich_message(source: &str, filename: Option<&str>, lineno: usize, message: &str) -> String {
    format!(
        "{}:{}\n{}\n\n{}",
        filename.unwrap_or("ejs"),
        lineno,
        context_window(source, lineno),
        message
    )
}

/// Enrich a thrown value with template position and raise it again.
/// The innermost template keeps the `path`/`line` fields; outer templates
/// only add their context to the message.
pub(crate) fn rethrow(
    err: JsValue,
    source: &str,
    filename: Option<&str>,
    lineno: usize,
    context: &mut Context,
) -> JsError {
    match annotate(err, source, filename, lineno, context) {
        Ok(err) => JsError::from_opaque(err),
        Err(err) => err,
    }
}

fn annotate(
    err: JsValue,
    source: &str,
    filename: Option<&str>,
    lineno: usize,
    context: &mut Context,
) -> JsResult<JsValue> {
    let err = if err.is_object() {
        err
    } else {
        let text = err.to_string(context)?.to_std_string_escaped();
        JsError::from_native(JsNativeError::error().with_message(text)).to_opaque(context)
    };
    let Some(object) = err.as_object() else {
        return Ok(err.clone());
    };

    if object.get(js_string!("path"), context)?.is_undefined() {
        let path = match filename {
            Some(name) => JsValue::from(JsString::from(name)),
            None => JsValue::undefined(),
        };
        object.set(js_string!("path"), path, false, context)?;
        object.set(js_string!("line"), JsValue::from(lineno as f64), false, context)?;
    }
    let message = object.get(js_string!("message"), context)?;
    let message = if message.is_undefined() {
        String::new()
    } else {
        message.to_string(context)?.to_std_string_escaped()
    };
    let enriched = enrich_message(source, filename, lineno, &message);
    object.set(
        js_string!("message"),
        JsValue::from(JsString::from(enriched.as_str())),
        false,
        context,
    )?;
    Ok(err.clone())
}

/// The `rethrow(err, source, filename, lineno)` helper handed to server templates
pub(crate) fn native(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_else(JsValue::undefined);
    let source = arg(1).to_string(context)?.to_std_string_escaped();
    let filename = match arg(2) {
        name if name.is_null_or_undefined() => None,
        name => Some(name.to_string(context)?.to_std_string_escaped()),
    };
    let lineno = arg(3).to_number(context)?;
    let lineno = if lineno.is_finite() && lineno >= 1.0 {
        lineno as usize
    } else {
        1
    };
    Err(rethrow(arg(0), &source, filename.as_deref(), lineno, context))
}

#[cfg(test)]
mod tests {
    use boa_engine::Source;

    use super::*;

    const SOURCE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine";

    fn field(err: &JsError, key: &str, context: &mut Context) -> String {
        let value = err.to_opaque(context);
        let object = value.as_object().unwrap();
        let field = object.get(JsString::from(key), context).unwrap();
        field.to_string(context).unwrap().to_std_string_escaped()
    }

    #[test]
    fn test_window_is_clamped_at_edges() {
        assert_eq!(context_window(SOURCE, 1), " >> 1| one\n    2| two\n    3| three\n    4| four");
        let tail = context_window(SOURCE, 9);
        assert!(tail.starts_with("    6| six"), "got: {}", tail);
        assert!(tail.ends_with(" >> 9| nine"), "got: {}", tail);
    }

    #[test]
    fn test_window_spans_three_lines_each_side() {
        let window = context_window(SOURCE, 5);
        assert_eq!(window.lines().count(), 7);
        assert!(window.contains(" >> 5| five"));
        assert!(window.contains("    2| two"));
        assert!(window.contains("    8| eight"));
    }

    #[test]
    fn test_rethrow_sets_fields_once() {
        let mut context = Context::default();
        let thrown = JsError::from_native(JsNativeError::typ().with_message("bad")).to_opaque(&mut context);
        let inner = rethrow(thrown, SOURCE, Some("inner.ejs"), 2, &mut context);
        let inner = inner.to_opaque(&mut context);
        let outer = rethrow(inner, "a\nb", Some("outer.ejs"), 1, &mut context);

        assert_eq!(field(&outer, "path", &mut context), "inner.ejs");
        assert_eq!(field(&outer, "line", &mut context), "2");
        let message = field(&outer, "message", &mut context);
        assert!(message.starts_with("outer.ejs:1\n >> 1| a"), "got: {}", message);
        assert!(message.contains("inner.ejs:2\n"), "got: {}", message);
        assert!(message.ends_with("\n\nbad"), "got: {}", message);
    }

    #[test]
    fn test_primitive_throw_becomes_error() {
        let mut context = Context::default();
        let err = rethrow(JsValue::from(js_string!("nope")), "x", None, 1, &mut context);
        assert_eq!(field(&err, "name", &mut context), "Error");
        assert_eq!(field(&err, "message", &mut context), "ejs:1\n >> 1| x\n\nnope");
    }

    #[test]
    fn test_script_source_matches_native() {
        let mut context = Context::default();
        let script = format!(
            "var r = {}; try {{ r(new TypeError('bad'), {}, 'f.ejs', 5); }} catch (e) {{ e.message + '|' + e.path + '|' + e.line; }}",
            RETHROW_SOURCE,
            serde_json::to_string(SOURCE).unwrap()
        );
        let out = context.eval(Source::from_bytes(&script)).unwrap();
        let out = out.to_string(&mut context).unwrap().to_std_string_escaped();
        let expected = format!("{}|f.ejs|5", enrich_message(SOURCE, Some("f.ejs"), 5, "bad"));
        assert_eq!(out, expected);
    }
}

//! String functions: predicates, search, slicing, casing, and `format`.

use regex::Regex;

use crate::{
    error::{RuntimeError, RuntimeErrorKind},
    stdlib::{FunctionDecl, FunctionRegistry, Overload, want_int, want_list, want_string},
    types::CelType,
    value::{Value, quote_string_into},
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use CelType::{Bool, Int, String as Str};
    let list_str = CelType::list_of(Str);

    registry.add(
        FunctionDecl::new("contains").overload(
            Overload::member("contains_string", vec![Str, Str], Bool)
                .with_impl(|a| Ok(Value::Bool(want_string(&a[0])?.contains(want_string(&a[1])?)))),
        ),
    );
    registry.add(
        FunctionDecl::new("startsWith").overload(
            Overload::member("starts_with_string", vec![Str, Str], Bool)
                .with_impl(|a| Ok(Value::Bool(want_string(&a[0])?.starts_with(want_string(&a[1])?)))),
        ),
    );
    registry.add(
        FunctionDecl::new("endsWith").overload(
            Overload::member("ends_with_string", vec![Str, Str], Bool)
                .with_impl(|a| Ok(Value::Bool(want_string(&a[0])?.ends_with(want_string(&a[1])?)))),
        ),
    );

    registry.add(
        FunctionDecl::new("matches")
            .overload(Overload::member("matches_string", vec![Str, Str], Bool).with_impl(|a| matches_impl(a)))
            .overload(Overload::global("matches", vec![Str, Str], Bool).with_impl(|a| matches_impl(a))),
    );

    registry.add(
        FunctionDecl::new("split")
            .overload(
                Overload::member("string_split", vec![Str, Str], list_str.clone())
                    .with_impl(|a| split_impl(want_string(&a[0])?, want_string(&a[1])?, -1)),
            )
            .overload(
                Overload::member("string_split_limit", vec![Str, Str, Int], list_str.clone())
                    .with_impl(|a| split_impl(want_string(&a[0])?, want_string(&a[1])?, want_int(&a[2])?)),
            ),
    );

    registry.add(
        FunctionDecl::new("join")
            .overload(
                Overload::member("list_join", vec![list_str.clone()], Str).with_impl(|a| join_impl(&a[0], "")),
            )
            .overload(
                Overload::member("list_join_separator", vec![list_str, Str], Str)
                    .with_impl(|a| join_impl(&a[0], want_string(&a[1])?)),
            ),
    );

    registry.add(
        FunctionDecl::new("replace")
            .overload(
                Overload::member("string_replace", vec![Str, Str, Str], Str).with_impl(|a| {
                    replace_impl(want_string(&a[0])?, want_string(&a[1])?, want_string(&a[2])?, -1)
                }),
            )
            .overload(
                Overload::member("string_replace_limit", vec![Str, Str, Str, Int], Str).with_impl(|a| {
                    replace_impl(
                        want_string(&a[0])?,
                        want_string(&a[1])?,
                        want_string(&a[2])?,
                        want_int(&a[3])?,
                    )
                }),
            ),
    );

    registry.add(
        FunctionDecl::new("trim").overload(
            Overload::member("string_trim", vec![Str], Str)
                .with_impl(|a| Ok(Value::from(want_string(&a[0])?.trim()))),
        ),
    );
    registry.add(
        FunctionDecl::new("lowerAscii").overload(
            Overload::member("string_lower_ascii", vec![Str], Str)
                .with_impl(|a| Ok(Value::from(want_string(&a[0])?.to_ascii_lowercase()))),
        ),
    );
    registry.add(
        FunctionDecl::new("upperAscii").overload(
            Overload::member("string_upper_ascii", vec![Str], Str)
                .with_impl(|a| Ok(Value::from(want_string(&a[0])?.to_ascii_uppercase()))),
        ),
    );

    registry.add(
        FunctionDecl::new("charAt").overload(
            Overload::member("string_char_at", vec![Str, Int], Str)
                .with_impl(|a| char_at_impl(want_string(&a[0])?, want_int(&a[1])?)),
        ),
    );

    registry.add(
        FunctionDecl::new("indexOf")
            .overload(
                Overload::member("string_index_of", vec![Str, Str], Int)
                    .with_impl(|a| index_of_impl(want_string(&a[0])?, want_string(&a[1])?, 0)),
            )
            .overload(
                Overload::member("string_index_of_offset", vec![Str, Str, Int], Int)
                    .with_impl(|a| index_of_impl(want_string(&a[0])?, want_string(&a[1])?, want_int(&a[2])?)),
            ),
    );
    registry.add(
        FunctionDecl::new("lastIndexOf")
            .overload(
                Overload::member("string_last_index_of", vec![Str, Str], Int)
                    .with_impl(|a| last_index_of_impl(want_string(&a[0])?, want_string(&a[1])?, None)),
            )
            .overload(
                Overload::member("string_last_index_of_offset", vec![Str, Str, Int], Int).with_impl(|a| {
                    last_index_of_impl(want_string(&a[0])?, want_string(&a[1])?, Some(want_int(&a[2])?))
                }),
            ),
    );

    registry.add(
        FunctionDecl::new("substring")
            .overload(
                Overload::member("string_substring", vec![Str, Int], Str)
                    .with_impl(|a| substring_impl(want_string(&a[0])?, want_int(&a[1])?, None)),
            )
            .overload(
                Overload::member("string_substring_range", vec![Str, Int, Int], Str)
                    .with_impl(|a| substring_impl(want_string(&a[0])?, want_int(&a[1])?, Some(want_int(&a[2])?))),
            ),
    );

    registry.add(
        FunctionDecl::new("format").overload(
            Overload::member("string_format", vec![Str, CelType::list_of(CelType::Dyn)], Str)
                .with_impl(|a| format_impl(want_string(&a[0])?, want_list(&a[1])?)),
        ),
    );

    registry.add(
        FunctionDecl::new("strings.quote").overload(
            Overload::global("strings_quote", vec![Str], Str).with_impl(|a| {
                let mut out = String::new();
                quote_string_into(&mut out, want_string(&a[0])?);
                Ok(Value::string(out))
            }),
        ),
    );

    registry.add(
        FunctionDecl::new("reverse").overload(
            Overload::member("string_reverse", vec![Str], Str)
                .with_impl(|a| Ok(Value::string(want_string(&a[0])?.chars().rev().collect::<String>()))),
        ),
    );
}

fn matches_impl(args: &[Value]) -> Result<Value, RuntimeError> {
    let subject = want_string(&args[0])?;
    let pattern = want_string(&args[1])?;
    let re = Regex::new(pattern)
        .map_err(|e| RuntimeError::new(RuntimeErrorKind::InvalidRegex, format!("invalid regex: {e}")))?;
    Ok(Value::Bool(re.is_match(subject)))
}

fn split_impl(s: &str, separator: &str, limit: i64) -> Result<Value, RuntimeError> {
    if limit == 0 {
        return Ok(Value::list(Vec::new()));
    }
    let parts: Vec<Value> = if separator.is_empty() {
        // Splitting on the empty string yields the individual characters.
        let mut chars: Vec<Value> = s.chars().map(|c| Value::from(c.to_string())).collect();
        if limit > 0 && (limit as usize) < chars.len() {
            let tail: String = s.chars().skip(limit as usize - 1).collect();
            chars.truncate(limit as usize - 1);
            chars.push(Value::from(tail));
        }
        chars
    } else if limit < 0 {
        s.split(separator).map(Value::from).collect()
    } else {
        s.splitn(limit as usize, separator).map(Value::from).collect()
    };
    Ok(Value::list(parts))
}

fn join_impl(list: &Value, separator: &str) -> Result<Value, RuntimeError> {
    let items = want_list(list)?;
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(want_string(item)?);
    }
    Ok(Value::string(out))
}

fn replace_impl(s: &str, from: &str, to: &str, limit: i64) -> Result<Value, RuntimeError> {
    if limit == 0 || from.is_empty() {
        return Ok(Value::from(s));
    }
    if limit < 0 {
        return Ok(Value::from(s.replace(from, to)));
    }
    Ok(Value::from(s.replacen(from, to, limit as usize)))
}

/// `charAt(i)` addresses Unicode code points; indexing one past the end
/// yields the empty string.
fn char_at_impl(s: &str, index: i64) -> Result<Value, RuntimeError> {
    let len = s.chars().count();
    if index < 0 || index as usize > len {
        return Err(RuntimeError::invalid_argument(format!(
            "index {index} out of range (size {len})"
        )));
    }
    if index as usize == len {
        return Ok(Value::from(""));
    }
    let c = s.chars().nth(index as usize).expect("index checked above");
    Ok(Value::from(c.to_string()))
}

fn char_window_find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn index_of_impl(s: &str, needle: &str, from: i64) -> Result<Value, RuntimeError> {
    let haystack: Vec<char> = s.chars().collect();
    if from < 0 || from as usize > haystack.len() {
        return Err(RuntimeError::invalid_argument(format!(
            "index {from} out of range (size {})",
            haystack.len()
        )));
    }
    let needle: Vec<char> = needle.chars().collect();
    Ok(Value::Int(
        char_window_find(&haystack, &needle, from as usize).map_or(-1, |i| i as i64),
    ))
}

fn last_index_of_impl(s: &str, needle: &str, from: Option<i64>) -> Result<Value, RuntimeError> {
    let haystack: Vec<char> = s.chars().collect();
    let needle_chars: Vec<char> = needle.chars().collect();
    let upper = match from {
        Some(from) => {
            if from < 0 || from as usize > haystack.len() {
                return Err(RuntimeError::invalid_argument(format!(
                    "index {from} out of range (size {})",
                    haystack.len()
                )));
            }
            from as usize
        }
        None => haystack.len(),
    };
    if needle_chars.is_empty() {
        return Ok(Value::Int(upper as i64));
    }
    let mut found: i64 = -1;
    let mut start = 0usize;
    while let Some(i) = char_window_find(&haystack, &needle_chars, start) {
        if i > upper {
            break;
        }
        found = i as i64;
        start = i + 1;
    }
    Ok(Value::Int(found))
}

fn substring_impl(s: &str, start: i64, end: Option<i64>) -> Result<Value, RuntimeError> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let end = end.unwrap_or(len);
    if start < 0 || end < start || end > len {
        return Err(RuntimeError::invalid_argument(format!(
            "substring range [{start}, {end}) out of bounds (size {len})"
        )));
    }
    Ok(Value::from(
        chars[start as usize..end as usize].iter().collect::<String>(),
    ))
}

/// `"%s / %d".format([a, b])` with the `%s %d %f %b %x %X %o %e` verbs plus
/// optional width and precision.
fn format_impl(template: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut next_arg = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut width = String::new();
        while chars.peek().is_some_and(char::is_ascii_digit) {
            width.push(chars.next().expect("peeked digit"));
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while chars.peek().is_some_and(char::is_ascii_digit) {
                digits.push(chars.next().expect("peeked digit"));
            }
            precision = Some(digits.parse().map_err(|_| {
                RuntimeError::invalid_argument("malformed precision in format string")
            })?);
        }
        let Some(verb) = chars.next() else {
            return Err(RuntimeError::invalid_argument("dangling '%' in format string"));
        };
        let Some(arg) = args.get(next_arg) else {
            return Err(RuntimeError::invalid_argument(
                "format string references more arguments than provided",
            ));
        };
        next_arg += 1;
        let rendered = format_verb(verb, precision, arg)?;
        if let Ok(width) = width.parse::<usize>() {
            out.push_str(&format!("{rendered:>width$}"));
        } else {
            out.push_str(&rendered);
        }
    }
    if next_arg < args.len() {
        return Err(RuntimeError::invalid_argument(
            "format string references fewer arguments than provided",
        ));
    }
    Ok(Value::string(out))
}

fn format_verb(verb: char, precision: Option<usize>, arg: &Value) -> Result<String, RuntimeError> {
    let wrong = |expected: &str| {
        RuntimeError::invalid_argument(format!(
            "format verb %{verb} expects {expected}, found {}",
            arg.type_name()
        ))
    };
    match verb {
        's' => Ok(match arg {
            Value::String(s) => match precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            },
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => other.to_string(),
        }),
        'd' => match arg {
            Value::Int(i) => Ok(i.to_string()),
            Value::Uint(u) => Ok(u.to_string()),
            _ => Err(wrong("an integer")),
        },
        'f' => match arg {
            Value::Double(d) => Ok(format!("{d:.*}", precision.unwrap_or(6))),
            Value::Int(i) => Ok(format!("{:.*}", precision.unwrap_or(6), *i as f64)),
            Value::Uint(u) => Ok(format!("{:.*}", precision.unwrap_or(6), *u as f64)),
            _ => Err(wrong("a number")),
        },
        'e' => match arg {
            Value::Double(d) => Ok(format!("{:.*e}", precision.unwrap_or(6), d)),
            _ => Err(wrong("a double")),
        },
        'b' => match arg {
            Value::Int(i) => Ok(format!("{i:b}")),
            Value::Uint(u) => Ok(format!("{u:b}")),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(wrong("an integer or bool")),
        },
        'x' => match arg {
            Value::Int(i) => Ok(format!("{i:x}")),
            Value::Uint(u) => Ok(format!("{u:x}")),
            Value::String(s) => Ok(hex_string(s.as_bytes(), false)),
            Value::Bytes(b) => Ok(hex_string(b, false)),
            _ => Err(wrong("an integer, string, or bytes")),
        },
        'X' => match arg {
            Value::Int(i) => Ok(format!("{i:X}")),
            Value::Uint(u) => Ok(format!("{u:X}")),
            Value::String(s) => Ok(hex_string(s.as_bytes(), true)),
            Value::Bytes(b) => Ok(hex_string(b, true)),
            _ => Err(wrong("an integer, string, or bytes")),
        },
        'o' => match arg {
            Value::Int(i) => Ok(format!("{i:o}")),
            Value::Uint(u) => Ok(format!("{u:o}")),
            _ => Err(wrong("an integer")),
        },
        other => Err(RuntimeError::invalid_argument(format!(
            "unsupported format verb %{other}"
        ))),
    }
}

fn hex_string(bytes: &[u8], upper: bool) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        if upper {
            out.push_str(&format!("{b:02X}"));
        } else {
            out.push_str(&format!("{b:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_and_char_at_are_char_based() {
        assert!(matches!(
            substring_impl("hello", 1, Some(4)).unwrap(),
            Value::String(s) if s.as_ref() == "ell"
        ));
        assert!(matches!(
            char_at_impl("héllo", 1).unwrap(),
            Value::String(s) if s.as_ref() == "é"
        ));
        assert!(matches!(char_at_impl("ab", 2).unwrap(), Value::String(s) if s.is_empty()));
        assert!(char_at_impl("ab", 3).is_err());
    }

    #[test]
    fn index_of_with_offset() {
        assert!(matches!(index_of_impl("banana", "na", 0).unwrap(), Value::Int(2)));
        assert!(matches!(index_of_impl("banana", "na", 3).unwrap(), Value::Int(4)));
        assert!(matches!(index_of_impl("banana", "zz", 0).unwrap(), Value::Int(-1)));
        assert!(matches!(last_index_of_impl("banana", "na", None).unwrap(), Value::Int(4)));
        assert!(matches!(
            last_index_of_impl("banana", "na", Some(3)).unwrap(),
            Value::Int(2)
        ));
    }

    #[test]
    fn split_limits() {
        let Value::List(parts) = split_impl("a,b,c", ",", -1).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(parts.len(), 3);
        let Value::List(parts) = split_impl("a,b,c", ",", 2).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], Value::String(s) if s.as_ref() == "b,c"));
        assert!(matches!(split_impl("a,b", ",", 0).unwrap(), Value::List(v) if v.is_empty()));
    }

    #[test]
    fn format_verbs() {
        let args = [Value::from("world"), Value::Int(42)];
        let Value::String(s) = format_impl("hello %s: %d", &args).unwrap() else {
            panic!("expected string");
        };
        assert_eq!(s.as_ref(), "hello world: 42");

        let Value::String(s) = format_impl("%.2f", &[Value::Double(3.14159)]).unwrap() else {
            panic!("expected string");
        };
        assert_eq!(s.as_ref(), "3.14");

        let Value::String(s) = format_impl("%x", &[Value::Int(255)]).unwrap() else {
            panic!("expected string");
        };
        assert_eq!(s.as_ref(), "ff");

        assert!(format_impl("%d", &[Value::from("nope")]).is_err());
        assert!(format_impl("%d %d", &[Value::Int(1)]).is_err());
    }
}

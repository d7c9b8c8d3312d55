//! Text formatting: `%`-interpolation, the format-spec mini-language and
//! `str.format` templates.

use std::iter::Peekable;
use std::str::{CharIndices, Chars};

use smr_code::constant::float_repr;

use crate::fault::{FaultKind, VmError};
use crate::ops::{get_attribute, get_item};
use crate::value::{Dict, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    AfterSign,
}

/// A parsed format spec: `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatSpec {
    fill: Option<char>,
    align: Option<Align>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: Option<usize>,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid_spec() -> VmError {
    VmError::value_error("Invalid format specifier")
}

fn parse_align(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

fn take_number(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Result<FormatSpec, VmError> {
        let mut parsed = FormatSpec::default();
        let leading: Vec<char> = spec.chars().take(2).collect();
        let mut chars = spec.chars().peekable();
        match leading.as_slice() {
            [fill, align, ..] if parse_align(*align).is_some() => {
                parsed.fill = Some(*fill);
                parsed.align = parse_align(*align);
                chars.next();
                chars.next();
            }
            [align, ..] if parse_align(*align).is_some() => {
                parsed.align = parse_align(*align);
                chars.next();
            }
            _ => {}
        }
        if let Some(sign) = chars.peek().copied().filter(|c| matches!(c, '+' | '-' | ' ')) {
            parsed.sign = Some(sign);
            chars.next();
        }
        if chars.peek() == Some(&'#') {
            parsed.alternate = true;
            chars.next();
        }
        if chars.peek() == Some(&'0') {
            parsed.zero = true;
            chars.next();
        }
        parsed.width = take_number(&mut chars);
        if let Some(grouping) = chars.peek().copied().filter(|c| matches!(c, ',' | '_')) {
            parsed.grouping = Some(grouping);
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            parsed.precision = Some(take_number(&mut chars).ok_or_else(|| {
                VmError::value_error("Format specifier missing precision")
            })?);
        }
        parsed.kind = chars.next();
        if chars.next().is_some() {
            return Err(invalid_spec());
        }
        Ok(parsed)
    }
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> Result<String, VmError> {
    if spec.is_empty() {
        return Ok(value.to_text());
    }
    let spec = FormatSpec::parse(spec)?;
    let unknown = |kind: char| {
        VmError::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            kind,
            value.type_name()
        ))
    };
    match value {
        Value::Float(v) => format_float(*v, &spec, unknown),
        Value::Int(_) | Value::Bool(_) => {
            let v = value.as_int().unwrap_or_default();
            match spec.kind {
                Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
                    format_float(v as f64, &spec, unknown)
                }
                _ => format_int(v, &spec, unknown),
            }
        }
        Value::Str(text) => match spec.kind {
            None | Some('s') => {
                if spec.sign.is_some() {
                    return Err(VmError::value_error(
                        "Sign not allowed in string format specifier",
                    ));
                }
                let body: String = match spec.precision {
                    Some(limit) => text.chars().take(limit).collect(),
                    None => text.to_string(),
                };
                Ok(pad(&spec, "", &body, Align::Left))
            }
            Some(kind) => Err(unknown(kind)),
        },
        other => {
            if spec.kind.is_some() || spec.sign.is_some() || spec.precision.is_some() {
                return Err(VmError::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )));
            }
            Ok(pad(&spec, "", &other.to_text(), Align::Left))
        }
    }
}

fn sign_prefix(negative: bool, sign: Option<char>) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn format_int(
    value: i64,
    spec: &FormatSpec,
    unknown: impl Fn(char) -> VmError,
) -> Result<String, VmError> {
    if spec.precision.is_some() {
        return Err(VmError::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let magnitude = value.unsigned_abs();
    let (prefix, digits) = match spec.kind {
        None | Some('d') | Some('n') => ("", magnitude.to_string()),
        Some('b') => ("0b", format!("{:b}", magnitude)),
        Some('o') => ("0o", format!("{:o}", magnitude)),
        Some('x') => ("0x", format!("{:x}", magnitude)),
        Some('X') => ("0X", format!("{:X}", magnitude)),
        Some('c') => {
            let c = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| VmError::new(FaultKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(pad(spec, "", &c.to_string(), Align::Left));
        }
        Some(kind) => return Err(unknown(kind)),
    };
    let digits = match (spec.grouping, spec.kind) {
        (Some(separator), None | Some('d')) => group_digits(&digits, separator, 3),
        (Some('_'), Some('b' | 'o' | 'x' | 'X')) => group_digits(&digits, '_', 4),
        (Some(_), Some(kind)) if kind != 'd' && kind != 'n' => {
            return Err(VmError::value_error(format!(
                "Cannot specify ',' with '{}'.",
                kind
            )))
        }
        _ => digits,
    };
    let mut head = sign_prefix(value < 0, spec.sign).to_string();
    if spec.alternate {
        head.push_str(prefix);
    }
    Ok(pad(spec, &head, &digits, Align::Right))
}

fn group_digits(digits: &str, separator: char, size: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (index, c) in chars.iter().enumerate() {
        if index > 0 && (chars.len() - index) % size == 0 {
            out.push(separator);
        }
        out.push(*c);
    }
    out
}

fn format_float(
    value: f64,
    spec: &FormatSpec,
    unknown: impl Fn(char) -> VmError,
) -> Result<String, VmError> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));
    let mut body = if !magnitude.is_finite() {
        let word = if magnitude.is_nan() { "nan" } else { "inf" };
        let word = if upper { word.to_uppercase() } else { word.to_string() };
        if spec.kind == Some('%') {
            format!("{}%", word)
        } else {
            word
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('e' | 'E') => exponent(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), spec.alternate, false),
            Some('%') => format!(
                "{}%",
                fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec.alternate)
            ),
            None => match spec.precision {
                Some(precision) => general(magnitude, precision, spec.alternate, true),
                None => float_repr(magnitude),
            },
            Some(kind) => return Err(unknown(kind)),
        }
    };
    if upper {
        body = body.to_uppercase();
    }
    if let Some(separator) = spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        body = format!("{}{}", group_digits(&body[..split], separator, 3), &body[split..]);
    }
    Ok(pad(spec, sign_prefix(negative, spec.sign), &body, Align::Right))
}

fn fixed(value: f64, precision: usize, alternate: bool) -> String {
    let text = format!("{:.*}", precision, value);
    if alternate && precision == 0 {
        format!("{}.", text)
    } else {
        text
    }
}

fn exponent(value: f64, precision: usize, alternate: bool) -> String {
    let text = format!("{:.*e}", precision, value);
    let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let dot = if alternate && precision == 0 { "." } else { "" };
    format!(
        "{}{}e{}{:02}",
        mantissa,
        dot,
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    )
}

/// `g` formatting. `repr_style` keeps at least one fractional digit, as a
/// spec with precision and no type does.
fn general(value: f64, precision: usize, alternate: bool, repr_style: bool) -> String {
    let precision = precision.max(1);
    if value == 0.0 {
        let mut text = if alternate {
            fixed(0.0, precision - 1, false)
        } else {
            "0".to_string()
        };
        if repr_style && !text.contains('.') {
            text.push_str(".0");
        }
        return text;
    }
    let rounded = format!("{:.*e}", precision - 1, value);
    let exp: i64 = rounded
        .split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0);
    let mut text = if -4 <= exp && exp < precision as i64 {
        fixed(value, (precision as i64 - 1 - exp) as usize, false)
    } else {
        exponent(value, precision - 1, false)
    };
    if !alternate {
        text = strip_fraction_zeros(&text);
    }
    if repr_style && !text.contains(['.', 'e']) {
        text.push_str(".0");
    }
    text
}

fn strip_fraction_zeros(text: &str) -> String {
    let (number, suffix) = match text.find('e') {
        Some(index) => text.split_at(index),
        None => (text, ""),
    };
    let number = if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    };
    format!("{}{}", number, suffix)
}

fn pad(spec: &FormatSpec, head: &str, body: &str, default: Align) -> String {
    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (None, None, true) if default == Align::Right => ('0', Align::AfterSign),
        (_, None, _) => (' ', default),
    };
    let used = head.chars().count() + body.chars().count();
    let missing = spec.width.unwrap_or(0).saturating_sub(used);
    let filler = |count: usize| std::iter::repeat(fill).take(count).collect::<String>();
    match align {
        Align::Left => format!("{}{}{}", head, body, filler(missing)),
        Align::Right => format!("{}{}{}", filler(missing), head, body),
        Align::Center => format!(
            "{}{}{}{}",
            filler(missing / 2),
            head,
            body,
            filler(missing - missing / 2)
        ),
        Align::AfterSign => format!("{}{}{}", head, filler(missing), body),
    }
}

enum PercentArgs<'a> {
    Positional(Vec<Value>),
    Mapping(&'a Value),
}

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> Result<String, VmError> {
    let source = match args {
        Value::Tuple(items) => PercentArgs::Positional(items.to_vec()),
        Value::Dict(_) => PercentArgs::Mapping(args),
        other => PercentArgs::Positional(vec![other.clone()]),
    };
    let mut positional = match &source {
        PercentArgs::Positional(items) => items.clone().into_iter(),
        PercentArgs::Mapping(_) => Vec::new().into_iter(),
    };
    let not_enough = || VmError::type_error("not enough arguments for format string");
    let mut out = String::new();
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut mapped: Option<Value> = None;
        if let Some((_, '(')) = chars.peek() {
            chars.next();
            let mut key = String::new();
            let mut depth = 1;
            for (_, c) in chars.by_ref() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                key.push(c);
            }
            let PercentArgs::Mapping(mapping) = &source else {
                return Err(VmError::type_error("format requires a mapping"));
            };
            mapped = Some(get_item(mapping, &Value::from(key))?);
        }
        let mut spec = FormatSpec::default();
        let mut left = false;
        while let Some(&(_, flag)) = chars.peek() {
            match flag {
                '-' => left = true,
                '+' => spec.sign = Some('+'),
                ' ' => {
                    if spec.sign.is_none() {
                        spec.sign = Some(' ')
                    }
                }
                '#' => spec.alternate = true,
                '0' => spec.zero = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = take_count(&mut chars, &mut positional)?;
        if let Some((_, '.')) = chars.peek() {
            chars.next();
            spec.precision = Some(take_count(&mut chars, &mut positional)?.unwrap_or(0));
        }
        while let Some((_, 'h' | 'l' | 'L')) = chars.peek() {
            chars.next();
        }
        let (index, conversion) = chars
            .next()
            .ok_or_else(|| VmError::value_error("incomplete format"))?;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        if left {
            spec.align = Some(Align::Left);
            spec.zero = false;
        }
        let value = match mapped {
            Some(value) => value,
            None => positional.next().ok_or_else(not_enough)?,
        };
        out.push_str(&percent_convert(conversion, index, &value, spec)?);
    }
    if matches!(source, PercentArgs::Positional(_)) && positional.next().is_some() {
        return Err(VmError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// A width or precision: digits, or `*` taking the next argument.
fn take_count(
    chars: &mut Peekable<CharIndices<'_>>,
    positional: &mut impl Iterator<Item = Value>,
) -> Result<Option<usize>, VmError> {
    if let Some((_, '*')) = chars.peek() {
        chars.next();
        let value = positional
            .next()
            .ok_or_else(|| VmError::type_error("not enough arguments for format string"))?;
        let count = value
            .as_int()
            .ok_or_else(|| VmError::type_error("* wants int"))?;
        return Ok(Some(count.max(0) as usize));
    }
    let mut digits = String::new();
    while let Some(&(_, d)) = chars.peek() {
        if !d.is_ascii_digit() {
            break;
        }
        digits.push(d);
        chars.next();
    }
    Ok(digits.parse().ok())
}

fn percent_convert(
    conversion: char,
    index: usize,
    value: &Value,
    mut spec: FormatSpec,
) -> Result<String, VmError> {
    let needs_number = |what: &str| {
        VmError::type_error(format!(
            "%{} format: {} is required, not {}",
            conversion,
            what,
            value.type_name()
        ))
    };
    let unknown = |kind: char| VmError::value_error(format!("unsupported format character '{}'", kind));
    match conversion {
        's' | 'r' | 'a' => {
            let text = if conversion == 's' {
                value.to_text()
            } else {
                value.repr()
            };
            spec.zero = false;
            spec.sign = None;
            let body: String = match spec.precision {
                Some(limit) => text.chars().take(limit).collect(),
                None => text,
            };
            Ok(pad(&spec, "", &body, Align::Right))
        }
        'd' | 'i' | 'u' => {
            let number = match value {
                Value::Float(v) if v.is_finite() => v.trunc() as i64,
                Value::Float(_) => return Err(VmError::overflow()),
                other => other.as_int().ok_or_else(|| needs_number("a number"))?,
            };
            spec.precision = None;
            format_int(number, &spec, unknown)
        }
        'o' | 'x' | 'X' => {
            let number = value.as_int().ok_or_else(|| needs_number("an integer"))?;
            spec.kind = Some(conversion);
            format_int(number, &spec, unknown)
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let number = value.as_float().ok_or_else(|| {
                VmError::type_error(format!("must be real number, not {}", value.type_name()))
            })?;
            spec.kind = Some(conversion);
            format_float(number, &spec, unknown)
        }
        'c' => {
            let c = match value {
                Value::Str(text) if text.chars().count() == 1 => text.to_string(),
                other => {
                    let code = other
                        .as_int()
                        .ok_or_else(|| VmError::type_error("%c requires int or char"))?;
                    u32::try_from(code)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| {
                            VmError::new(FaultKind::OverflowError, "%c arg not in range(0x110000)")
                        })?
                        .to_string()
                }
            };
            spec.zero = false;
            Ok(pad(&spec, "", &c, Align::Right))
        }
        other => Err(VmError::value_error(format!(
            "unsupported format character '{}' (0x{:x}) at index {}",
            other, other as u32, index
        ))),
    }
}

/// `template.format(*args, **kwargs)`.
pub fn str_format(template: &str, args: &[Value], kwargs: &Dict) -> Result<String, VmError> {
    let mut state = AutoNumbering::default();
    render_template(template, args, kwargs, &mut state, 2)
}

#[derive(Default)]
struct AutoNumbering {
    next: usize,
    manual: bool,
}

fn render_template(
    template: &str,
    args: &[Value],
    kwargs: &Dict,
    numbering: &mut AutoNumbering,
    depth: usize,
) -> Result<String, VmError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(VmError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                let mut nesting = 1;
                loop {
                    let c = chars.next().ok_or_else(|| {
                        VmError::value_error("expected '}' before end of string")
                    })?;
                    match c {
                        '{' => nesting += 1,
                        '}' => {
                            nesting -= 1;
                            if nesting == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    field.push(c);
                }
                out.push_str(&render_field(&field, args, kwargs, numbering, depth)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn render_field(
    field: &str,
    args: &[Value],
    kwargs: &Dict,
    numbering: &mut AutoNumbering,
    depth: usize,
) -> Result<String, VmError> {
    let (reference, spec) = match field.find(':') {
        Some(index) => (&field[..index], &field[index + 1..]),
        None => (field, ""),
    };
    let (reference, conversion) = match reference.find('!') {
        Some(index) => (&reference[..index], Some(&reference[index + 1..])),
        None => (reference, None),
    };
    let split = reference.find(['.', '[']).unwrap_or(reference.len());
    let (head, mut rest) = reference.split_at(split);
    let mut value = if head.is_empty() {
        if numbering.manual {
            return Err(VmError::value_error(
                "cannot switch from manual field specification to automatic field numbering",
            ));
        }
        let index = numbering.next;
        numbering.next += 1;
        positional(args, index)?
    } else if let Ok(index) = head.parse::<usize>() {
        if numbering.next > 0 {
            return Err(VmError::value_error(
                "cannot switch from automatic field numbering to manual field specification",
            ));
        }
        numbering.manual = true;
        positional(args, index)?
    } else {
        kwargs
            .get(&Value::from(head))
            .cloned()
            .ok_or_else(|| VmError::key_error(Value::from(head)))?
    };
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail.find(['.', '[']).unwrap_or(tail.len());
            value = get_attribute(&value, &tail[..end])?;
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail
                .find(']')
                .ok_or_else(|| VmError::value_error("Missing ']' in format string"))?;
            let key = &tail[..end];
            let key = match key.parse::<i64>() {
                Ok(index) => Value::Int(index),
                Err(_) => Value::from(key),
            };
            value = get_item(&value, &key)?;
            rest = &tail[end + 1..];
        } else {
            return Err(VmError::value_error(
                "Only '.' or '[' may follow ']' in format field specifier",
            ));
        }
    }
    let value = match conversion {
        None => value,
        Some("s") => Value::from(value.to_text()),
        Some("r") | Some("a") => Value::from(value.repr()),
        Some(other) => {
            return Err(VmError::value_error(format!(
                "Unknown conversion specifier {}",
                other
            )))
        }
    };
    let spec = if spec.contains('{') {
        if depth == 0 {
            return Err(VmError::value_error("Max string recursion exceeded"));
        }
        render_template(spec, args, kwargs, numbering, depth - 1)?
    } else {
        spec.to_string()
    };
    format_value(&value, &spec)
}

fn positional(args: &[Value], index: usize) -> Result<Value, VmError> {
    args.get(index).cloned().ok_or_else(|| {
        VmError::new(
            FaultKind::IndexError,
            format!(
                "Replacement index {} out of range for positional args tuple",
                index
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).expect("format")
    }

    #[test]
    fn spec_mini_language() {
        assert_eq!(fmt(Value::Int(42), ">6"), "    42");
        assert_eq!(fmt(Value::Int(-42), "06"), "-00042");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::from("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(1234.5), "e"), "1.234500e+03");
        assert_eq!(fmt(Value::Float(0.00001), "g"), "1e-05");
        assert_eq!(fmt(Value::Float(2.0), ".3"), "2.0");
        assert_eq!(fmt(Value::Float(0.25), ".0%"), "25%");
    }

    #[test]
    fn unknown_codes_are_value_errors() {
        let err = format_value(&Value::from("x"), "d").expect_err("bad code");
        assert_eq!(
            err.fault.text(),
            "Unknown format code 'd' for object of type 'str'"
        );
    }

    #[test]
    fn percent_interpolation() {
        let args = Value::tuple(vec![Value::from("n"), Value::Int(7), Value::Float(0.5)]);
        assert_eq!(
            percent_format("%s=%03d (%.1f%%) %r", &Value::tuple(vec![
                Value::from("n"),
                Value::Int(7),
                Value::Float(0.5),
                Value::from("q"),
            ]))
            .expect("format"),
            "n=007 (0.5%) 'q'"
        );
        let err = percent_format("%s %s", &Value::from("one")).expect_err("short");
        assert_eq!(err.fault.text(), "not enough arguments for format string");
        let err = percent_format("%s", &args).expect_err("long");
        assert_eq!(
            err.fault.text(),
            "not all arguments converted during string formatting"
        );
    }

    #[test]
    fn percent_mapping_keys() {
        let mut dict = Dict::new();
        dict.insert(Value::from("who"), Value::from("world"))
            .expect("insert");
        assert_eq!(
            percent_format("hello %(who)s", &Value::dict(dict)).expect("format"),
            "hello world"
        );
    }

    #[test]
    fn template_fields() {
        let mut kwargs = Dict::new();
        kwargs.insert(Value::from("x"), Value::Float(1.5)).expect("insert");
        let args = [Value::from("a"), Value::list(vec![Value::Int(9)])];
        assert_eq!(
            str_format("{0}-{1[0]}-{x:>5}-{0!r}-{{}}", &args, &kwargs).expect("format"),
            "a-9-  1.5-'a'-{}"
        );
        assert_eq!(
            str_format("{}{}", &args[..1], &Dict::new())
                .expect_err("index")
                .kind_name(),
            "IndexError"
        );
    }
}

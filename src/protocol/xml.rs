//! Минимальный разбор «плоского» XML: корневой элемент с дочерними
//! текстовыми элементами без вложенности. Атрибуты игнорируются.

use std::fmt::Write as _;

use herald_error::CodecError;

const FORMAT: &str = "xml";

/// Корневой элемент и его дочерние `(имя, текст)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatElement {
    pub name: String,
    pub children: Vec<(String, String)>,
}

impl FlatElement {
    /// Текст первого дочернего элемента (имя без учёта регистра).
    pub fn child(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.children
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        format: FORMAT,
        reason: reason.into(),
    }
}

/// Читает открывающий тег в начале `input`.
///
/// Возвращает имя, признак самозакрывающегося тега и остаток строки.
fn open_tag(input: &str) -> Result<(&str, bool, &str), CodecError> {
    let rest = input
        .strip_prefix('<')
        .ok_or_else(|| malformed("expected '<'"))?;
    let end = rest.find('>').ok_or_else(|| malformed("unterminated tag"))?;
    let inner = &rest[..end];
    let self_closing = inner.ends_with('/');
    let inner = inner.trim_end_matches('/');
    let name = inner.split_whitespace().next().unwrap_or("");
    if name.is_empty() || name.starts_with('/') {
        return Err(malformed("empty tag name"));
    }
    Ok((name, self_closing, &rest[end + 1..]))
}

/// Разбирает документ вида `<root><a>x</a><b/></root>`.
pub fn parse_flat(input: &str) -> Result<FlatElement, CodecError> {
    let mut rest = input.trim();
    if rest.starts_with("<?") {
        let end = rest.find("?>").ok_or_else(|| malformed("unterminated prolog"))?;
        rest = rest[end + 2..].trim_start();
    }

    let (root, self_closing, after) = open_tag(rest)?;
    let mut element = FlatElement {
        name: root.to_string(),
        children: Vec::new(),
    };
    if self_closing {
        return if after.trim().is_empty() {
            Ok(element)
        } else {
            Err(malformed("trailing data after root element"))
        };
    }

    rest = after;
    loop {
        rest = rest.trim_start();
        if let Some(closing) = rest.strip_prefix("</") {
            let end = closing
                .find('>')
                .ok_or_else(|| malformed("unterminated closing tag"))?;
            if !closing[..end].trim().eq_ignore_ascii_case(root) {
                return Err(malformed(format!("mismatched closing tag for <{root}>")));
            }
            if !closing[end + 1..].trim().is_empty() {
                return Err(malformed("trailing data after root element"));
            }
            return Ok(element);
        }
        if rest.is_empty() {
            return Err(malformed(format!("missing </{root}>")));
        }
        if !rest.starts_with('<') {
            return Err(malformed("unexpected text in root element"));
        }

        let (name, self_closing, after) = open_tag(rest)?;
        if self_closing {
            element.children.push((name.to_string(), String::new()));
            rest = after;
            continue;
        }

        let end = after
            .find('<')
            .ok_or_else(|| malformed(format!("missing </{name}>")))?;
        let raw = &after[..end];
        let Some(closing) = after[end..].strip_prefix("</") else {
            return Err(malformed(format!("nested elements in <{name}> are not supported")));
        };
        let close_end = closing
            .find('>')
            .ok_or_else(|| malformed("unterminated closing tag"))?;
        if !closing[..close_end].trim().eq_ignore_ascii_case(name) {
            return Err(malformed(format!("mismatched closing tag for <{name}>")));
        }
        element.children.push((name.to_string(), unescape(raw)?));
        rest = &closing[close_end + 1..];
    }
}

/// Декодирует сущности XML, включая числовые.
pub fn unescape(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let end = tail
            .find(';')
            .ok_or_else(|| malformed("unterminated entity"))?;
        let entity = &tail[..end];
        let ch = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => numeric_entity(entity)
                .ok_or_else(|| malformed(format!("unknown entity '&{entity};'")))?,
        };
        out.push(ch);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

/// Экранирует текст для XML в однострочном протоколе: переводы строк
/// заменяются числовыми сущностями.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' | '\r' => {
                let _ = write!(out, "&#{};", ch as u32);
            }
            _ => out.push(ch),
        }
    }
    out
}

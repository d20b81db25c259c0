use crate::utils::error::ServiceError;
use crate::Result;
use logos::Logos;
use std::collections::BTreeMap;

/// 类别ID到类别名称的映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
    entries: BTreeMap<u32, String>,
}

impl LabelMap {
    /// 解析 TensorFlow object-detection 格式的 label map:
    ///
    /// ```text
    /// item {
    ///   id: 1
    ///   name: 'cat'
    /// }
    /// ```
    ///
    /// 存在 `display_name` 时优先使用。
    pub fn from_pbtxt(content: &str) -> Result<Self> {
        let tokens = tokenize(content)?;
        let mut entries = BTreeMap::new();
        let mut pos = 0;

        while pos < tokens.len() {
            match &tokens[pos] {
                Token::Ident(ident) if ident == "item" => {
                    pos += 1;
                    if tokens.get(pos) != Some(&Token::Open) {
                        return Err(label_error("expected '{' after 'item'"));
                    }
                    pos += 1;

                    let mut id: Option<u32> = None;
                    let mut name: Option<String> = None;
                    let mut display_name: Option<String> = None;

                    loop {
                        match tokens.get(pos) {
                            Some(Token::Close) => {
                                pos += 1;
                                break;
                            }
                            Some(Token::Ident(key)) => {
                                let key = key.clone();
                                pos += 1;
                                if tokens.get(pos) == Some(&Token::Colon) {
                                    pos += 1;
                                }
                                let value = tokens
                                    .get(pos)
                                    .ok_or_else(|| label_error("unexpected end of label map"))?;
                                pos += 1;

                                match (key.as_str(), value) {
                                    ("id", Token::Ident(raw)) => {
                                        id = Some(raw.parse().map_err(|_| {
                                            label_error(&format!("invalid id '{}'", raw))
                                        })?);
                                    }
                                    ("name", Token::Str(s)) => name = Some(s.clone()),
                                    ("display_name", Token::Str(s)) => {
                                        display_name = Some(s.clone())
                                    }
                                    // 其他字段（如 keypoints）忽略
                                    _ => {}
                                }
                            }
                            Some(_) => return Err(label_error("unexpected token inside item")),
                            None => return Err(label_error("unterminated item block")),
                        }
                    }

                    let id = id.ok_or_else(|| label_error("item without id"))?;
                    let label = display_name
                        .or(name)
                        .ok_or_else(|| label_error(&format!("item {} without name", id)))?;

                    if entries.insert(id, label).is_some() {
                        return Err(label_error(&format!("duplicate id {}", id)));
                    }
                }
                _ => return Err(label_error("expected 'item' block")),
            }
        }

        Ok(Self { entries })
    }

    /// 每行一个标签，ID从1开始（0保留给背景类）
    pub fn from_lines(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| (i as u32 + 1, line.to_string()))
            .collect();
        Self { entries }
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    /// 按ID顺序返回所有标签名称
    pub fn names(&self) -> Vec<String> {
        self.entries.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn label_error(message: &str) -> ServiceError {
    ServiceError::Config(format!("Invalid label map: {}", message))
}

/// label map 的词法单元
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f,;]+")]
#[logos(skip r"#[^\n]*")]
enum Token {
    #[token("{")]
    Open,
    #[token("}")]
    Close,
    #[token(":")]
    Colon,

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unquote(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z0-9_][A-Za-z0-9_.\-]*", |lex| lex.slice().to_string())]
    Ident(String),
}

/// 去掉引号并处理反斜杠转义
fn unquote(raw: &str) -> String {
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw[1..raw.len() - 1].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.extend(chars.next()),
            c => value.push(c),
        }
    }
    value
}

fn tokenize(content: &str) -> Result<Vec<Token>> {
    let mut lexer = Token::lexer(content);
    let mut tokens = Vec::new();

    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push(token),
            Err(_) => {
                return Err(label_error(&format!(
                    "unexpected input '{}' at offset {}",
                    lexer.slice(),
                    lexer.span().start
                )))
            }
        }
    }

    Ok(tokens)
}

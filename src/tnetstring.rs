/*
 * Copyright (C) 2026 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

#[cfg(test)]
use std::{fmt, str};

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    String(&'a [u8]),
    Map(Vec<(&'a str, Value<'a>)>),
}

impl Value<'_> {
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Value::String(s) => write_frame(out, s, b','),
            Value::Map(items) => {
                let mut body = Vec::new();

                for (k, v) in items {
                    write_frame(&mut body, k.as_bytes(), b',');
                    v.serialize(&mut body);
                }

                write_frame(out, &body, b'}');
            }
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize(&mut out);

        out
    }
}

fn write_frame(out: &mut Vec<u8>, data: &[u8], tag: u8) {
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(data);
    out.push(tag);
}

#[cfg(test)]
#[derive(Debug, PartialEq)]
pub enum ParseError {
    UnexpectedEof,
    InvalidData,
    InvalidKey,
}

#[cfg(test)]
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected eof"),
            Self::InvalidData => write!(f, "invalid data"),
            Self::InvalidKey => write!(f, "map key must be a utf-8 string"),
        }
    }
}

#[cfg(test)]
#[derive(Debug, PartialEq)]
pub struct Frame<'a> {
    pub tag: u8,
    pub data: &'a [u8],
}

#[cfg(test)]
// Parses one frame, returning it and the number of bytes consumed.
pub fn parse_frame(src: &[u8]) -> Result<(Frame<'_>, usize), ParseError> {
    let colon = match src.iter().position(|&b| b == b':') {
        Some(pos) => pos,
        None => return Err(ParseError::UnexpectedEof),
    };

    let len: usize = match str::from_utf8(&src[..colon]).ok().and_then(|s| s.parse().ok()) {
        Some(len) => len,
        None => return Err(ParseError::InvalidData),
    };

    let start = colon + 1;
    let end = match start.checked_add(len) {
        Some(end) => end,
        None => return Err(ParseError::InvalidData),
    };

    if end >= src.len() {
        return Err(ParseError::UnexpectedEof);
    }

    let frame = Frame {
        tag: src[end],
        data: &src[start..end],
    };

    Ok((frame, end + 1))
}

#[cfg(test)]
impl<'a> Frame<'a> {
    // Splits a map frame into its key/value frames.
    pub fn map_items(&self) -> Result<Vec<(&'a str, Frame<'a>)>, ParseError> {
        if self.tag != b'}' {
            return Err(ParseError::InvalidData);
        }

        let data = self.data;

        let mut items = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let (key, size) = parse_frame(&data[pos..])?;
            pos += size;

            if key.tag != b',' {
                return Err(ParseError::InvalidKey);
            }

            let key = str::from_utf8(key.data).map_err(|_| ParseError::InvalidKey)?;

            let (value, size) = parse_frame(&data[pos..])?;
            pos += size;

            items.push((key, value));
        }

        Ok(items)
    }
}

#[cfg(test)]
pub fn parse_map(src: &[u8]) -> Result<Vec<(&str, Frame)>, ParseError> {
    let (frame, _) = parse_frame(src)?;

    frame.map_items()
}

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

use crate::tnetstring;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    NoVerb,
    BadVerb,
    MissingResource,
    MissingQuery,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoVerb => "request contained no verb",
            Self::BadVerb => "request verb was not GET",
            Self::MissingResource => "request contained no resource",
            Self::MissingQuery => "request contained no query string",
        };

        write!(f, "{}", s)
    }
}

#[derive(Debug, PartialEq)]
pub struct Request<'a> {
    pub resource: &'a [u8],
    pub query: &'a [u8],
}

#[derive(Debug, PartialEq)]
pub enum Dispatch {
    Forward(Vec<u8>),
    Reject(RejectReason),
}

pub fn parse_request_line(line: &[u8]) -> Result<Request, RejectReason> {
    let mut tokens = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty());

    let verb = tokens.next().ok_or(RejectReason::NoVerb)?;

    if verb != b"GET" {
        return Err(RejectReason::BadVerb);
    }

    let resource = tokens.next().ok_or(RejectReason::MissingResource)?;

    let query = match resource.iter().position(|&b| b == b'?') {
        Some(pos) => &resource[(pos + 1)..],
        None => return Err(RejectReason::MissingQuery),
    };

    if query.is_empty() {
        return Err(RejectReason::MissingQuery);
    }

    Ok(Request { resource, query })
}

// Builds the opaque payload the broker receives. What the payload means is
// up to the service behind the broker.
pub trait RequestBuilder {
    fn build(&mut self, req: &Request) -> Vec<u8>;
}

// Encodes requests as a 'T'-prefixed tnetstring map with a fresh random id.
#[derive(Default)]
pub struct TnetRequestBuilder;

impl TnetRequestBuilder {
    pub fn build_with_id(&self, id: &str, req: &Request) -> Vec<u8> {
        let params: Vec<(Cow<str>, Cow<str>)> =
            url::form_urlencoded::parse(req.query).collect();

        let value = tnetstring::Value::Map(vec![
            ("id", tnetstring::Value::String(id.as_bytes())),
            ("resource", tnetstring::Value::String(req.resource)),
            ("query", tnetstring::Value::String(req.query)),
            (
                "params",
                tnetstring::Value::Map(
                    params
                        .iter()
                        .map(|(k, v)| (k.as_ref(), tnetstring::Value::String(v.as_bytes())))
                        .collect(),
                ),
            ),
        ]);

        let mut out = vec![b'T'];
        value.serialize(&mut out);

        out
    }
}

impl RequestBuilder for TnetRequestBuilder {
    fn build(&mut self, req: &Request) -> Vec<u8> {
        let id = format!("{:016x}", fastrand::u64(..));

        self.build_with_id(&id, req)
    }
}

pub struct Dispatcher {
    builder: Box<dyn RequestBuilder>,
}

impl Dispatcher {
    pub fn new(builder: Box<dyn RequestBuilder>) -> Self {
        Self { builder }
    }

    pub fn dispatch(&mut self, line: &[u8]) -> Dispatch {
        match parse_request_line(line) {
            Ok(req) => Dispatch::Forward(self.builder.build(&req)),
            Err(reason) => Dispatch::Reject(reason),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Box::new(TnetRequestBuilder))
    }
}

//! # Match Hostnames
//!
//! ## Priority
//!
//! | Priority |   Rule             |  Example              |
//! |:--------:|:-------------------|:----------------------|
//! |  0       | Exact Host         |  example.com          |
//! |  1       | Partial wildcard   |  *.example.com        |
//! |  2       | Wild Card          |  *                    |
//!
//! A partial wildcard covers exactly one leading label, so `*.example.com`
//! matches `api.example.com` but neither `example.com` nor `v1.api.example.com`.
//!
//! it would be a tree like this:
//!
//! ```text
//! com
//! |
//! +- example
//!    |
//!    +- api
//!    \- *
//! ```

use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone)]
pub struct HostnameTree<T> {
    host: HostnameMatcherNode<T>,
    fallback: Option<T>,
}

impl<T> Default for HostnameTree<T> {
    fn default() -> Self {
        Self {
            host: HostnameMatcherNode::new(),
            fallback: None,
        }
    }
}

impl<T> HostnameTree<T> {
    pub fn new() -> Self {
        Self::default()
    }
    /// Most specific data for a request host, port ignored.
    pub fn get(&self, host: &str) -> Option<&T> {
        let host = host.rsplit_once(':').map(|(host, _)| host).unwrap_or(host);
        self.host.get(host).or(self.fallback.as_ref())
    }
    /// Every data matching a request host, most specific first, ending with the fallback.
    pub fn candidates(&self, host: &str) -> Vec<&T> {
        let host = host.rsplit_once(':').map(|(host, _)| host).unwrap_or(host).to_ascii_lowercase();
        let mut found = Vec::new();
        self.host.collect_by_iter(host.split('.').rev(), &mut found);
        found.extend(self.fallback.as_ref());
        found
    }
    pub fn set(&mut self, host: &str, data: T) {
        if host == "*" {
            self.fallback = Some(data);
        } else {
            self.host.set(host, data);
        }
    }
}

/// we don't neet a radix tree here, because host name won't be too long
#[derive(Clone)]
pub struct HostnameMatcherNode<T> {
    data: Option<T>,
    children: BTreeMap<String, HostnameMatcherNode<T>>,
    /// for * match
    else_node: Option<Box<HostnameMatcherNode<T>>>,
}

impl<T> Default for HostnameMatcherNode<T> {
    fn default() -> Self {
        Self {
            data: None,
            children: BTreeMap::new(),
            else_node: None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for HostnameMatcherNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut df = f.debug_struct("HostnameMatcherNode");
        if let Some(data) = &self.data {
            df.field("_", data);
        }
        for (key, node) in &self.children {
            df.field(key, node);
        }
        if let Some(node) = &self.else_node {
            df.field("*", node);
        }
        df.finish()
    }
}

impl<T> HostnameMatcherNode<T> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn append_by_iter<'a, I>(&mut self, mut host: I, data: T)
    where
        I: Iterator<Item = &'a str>,
    {
        match host.next() {
            Some("*") => self.else_node.get_or_insert_with(Default::default).append_by_iter(host, data),
            Some(segment) => self.children.entry(segment.to_ascii_lowercase()).or_default().append_by_iter(host, data),
            None => self.data = Some(data),
        }
    }
    pub fn set(&mut self, host: &str, data: T) {
        self.append_by_iter(host.split('.').rev(), data);
    }
    pub fn get_by_iter<'a, I>(&self, mut host: I) -> Option<&T>
    where
        I: Iterator<Item = &'a str> + Clone,
    {
        let Some(segment) = host.next() else {
            return self.data.as_ref();
        };
        let children_match = self.children.get(segment).and_then(|node| node.get_by_iter(host.clone()));
        children_match.or_else(|| self.else_node.as_ref()?.get_by_iter(host))
    }
    pub fn get(&self, host: &str) -> Option<&T> {
        let host = host.to_ascii_lowercase();
        self.get_by_iter(host.split('.').rev())
    }
    /// Same walk as [`Self::get_by_iter`], keeping every match instead of the first.
    pub fn collect_by_iter<'a, 's, I>(&'s self, mut host: I, found: &mut Vec<&'s T>)
    where
        I: Iterator<Item = &'a str> + Clone,
    {
        let Some(segment) = host.next() else {
            found.extend(self.data.as_ref());
            return;
        };
        if let Some(node) = self.children.get(segment) {
            node.collect_by_iter(host.clone(), found);
        }
        if let Some(node) = &self.else_node {
            node.collect_by_iter(host, found);
        }
    }
}

use std::{collections::BTreeSet, fmt::Write};

use nsgate_model::PathType;

use super::{ProxyConfig, Server};

const TLS_DIR: &str = "/etc/nsgate/tls";

/// Render an nginx `http` context include.
pub(super) fn render(config: &ProxyConfig) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_config(&mut out, config);
    out
}

fn write_config(out: &mut String, config: &ProxyConfig) -> std::fmt::Result {
    writeln!(out, "# managed by nsgate, do not edit")?;
    for upstream in &config.upstreams {
        writeln!(out, "upstream {} {{", upstream.name)?;
        for server in &upstream.servers {
            writeln!(out, "    server {server};")?;
        }
        writeln!(out, "}}")?;
    }
    for server in &config.servers {
        write_server(out, server)?;
    }
    Ok(())
}

fn write_server(out: &mut String, server: &Server) -> std::fmt::Result {
    writeln!(out, "server {{")?;
    if ProxyConfig::is_catch_all(server) {
        writeln!(out, "    listen 80 default_server;")?;
        writeln!(out, "    server_name _;")?;
    } else {
        writeln!(out, "    listen 80;")?;
        writeln!(out, "    server_name {};", server.host)?;
    }
    if let Some(secret) = &server.tls_secret {
        // `namespace/name`, one directory per namespace
        writeln!(out, "    listen 443 ssl;")?;
        writeln!(out, "    ssl_certificate {};", quote(&format!("{TLS_DIR}/{secret}.crt")))?;
        writeln!(out, "    ssl_certificate_key {};", quote(&format!("{TLS_DIR}/{secret}.key")))?;
    }
    let exact: BTreeSet<&str> = server.locations.iter().filter(|l| l.path_type == PathType::Exact).map(|l| l.path.as_str()).collect();
    for location in &server.locations {
        match location.path_type {
            PathType::Exact => write_location(out, "= ", &location.path, &location.upstream)?,
            PathType::Prefix if location.path == "/" => write_location(out, "", "/", &location.upstream)?,
            // nginx prefixes are plain string prefixes, match whole segments instead
            PathType::Prefix => {
                if !exact.contains(location.path.as_str()) {
                    write_location(out, "= ", &location.path, &location.upstream)?;
                }
                write_location(out, "", &format!("{}/", location.path), &location.upstream)?;
            }
        }
    }
    writeln!(out, "}}")
}

fn write_location(out: &mut String, modifier: &str, path: &str, upstream: &str) -> std::fmt::Result {
    writeln!(out, "    location {modifier}{} {{", quote(path))?;
    writeln!(out, "        proxy_pass http://{upstream};")?;
    writeln!(out, "    }}")
}

/// Double-quoted nginx string.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

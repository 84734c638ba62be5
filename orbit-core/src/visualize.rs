// Visualization export: D3 JSON, GEXF and a standalone HTML page

use crate::analysis::AnalysisResult;
use orbit_scanner::graph::{EdgeType, Graph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    D3,
    Gexf,
    Html,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "d3" | "json" => Some(ExportFormat::D3),
            "gexf" => Some(ExportFormat::Gexf),
            "html" => Some(ExportFormat::Html),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::D3 => "d3",
            ExportFormat::Gexf => "gexf",
            ExportFormat::Html => "html",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::D3 => "json",
            ExportFormat::Gexf => "gexf",
            ExportFormat::Html => "html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct D3Node {
    pub id: String,
    pub group: String,
    pub influence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct D3Link {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: EdgeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct D3Graph {
    pub nodes: Vec<D3Node>,
    pub links: Vec<D3Link>,
}

/// Display colour of a cluster, derived from its id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ClusterColor {
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

fn fnv1a(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    input.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> ClusterColor {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let sector = h / 60.0;
    let x = c * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    ClusterColor {
        r: channel(r),
        g: channel(g),
        b: channel(b),
    }
}

pub fn cluster_color(cluster_id: &str) -> ClusterColor {
    let hue = (fnv1a(cluster_id) % 360) as f64;
    hsl_to_rgb(hue, 0.65, 0.5)
}

pub fn build_d3_graph(graph: &Graph, analysis: &AnalysisResult) -> D3Graph {
    let nodes = graph
        .nodes
        .keys()
        .map(|id| D3Node {
            id: id.clone(),
            group: analysis.cluster_of(id).unwrap_or(id.as_str()).to_string(),
            influence: round4(analysis.score_of(id)),
        })
        .collect();

    let links = graph
        .edges
        .iter()
        .map(|e| D3Link {
            source: e.source.clone(),
            target: e.target.clone(),
            link_type: e.edge_type,
        })
        .collect();

    D3Graph { nodes, links }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn generate_d3(graph: &Graph, analysis: &AnalysisResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&build_d3_graph(graph, analysis))
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

pub fn generate_gexf(graph: &Graph, analysis: &AnalysisResult) -> String {
    let mut gexf = String::new();
    gexf.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    gexf.push_str(
        "<gexf xmlns=\"http://gexf.net/1.3\" xmlns:viz=\"http://gexf.net/1.3/viz\" version=\"1.3\">\n",
    );
    gexf.push_str(&format!(
        "  <meta lastmodifieddate=\"{}\">\n",
        graph.created_at.format("%Y-%m-%d")
    ));
    gexf.push_str("    <creator>Orbit</creator>\n");
    gexf.push_str(&format!(
        "    <description>Social graph around {}</description>\n",
        xml_escape(&graph.seed)
    ));
    gexf.push_str("  </meta>\n");
    gexf.push_str("  <graph mode=\"static\" defaultedgetype=\"directed\">\n");
    gexf.push_str("    <attributes class=\"node\">\n");
    gexf.push_str("      <attribute id=\"group\" title=\"group\" type=\"string\"/>\n");
    gexf.push_str("      <attribute id=\"influence\" title=\"influence\" type=\"double\"/>\n");
    gexf.push_str("    </attributes>\n");
    gexf.push_str("    <attributes class=\"edge\">\n");
    gexf.push_str("      <attribute id=\"type\" title=\"type\" type=\"string\"/>\n");
    gexf.push_str("    </attributes>\n");

    gexf.push_str("    <nodes>\n");
    for id in graph.nodes.keys() {
        let group = analysis.cluster_of(id).unwrap_or(id.as_str());
        let color = cluster_color(group);
        gexf.push_str(&format!(
            "      <node id=\"{0}\" label=\"{0}\">\n",
            xml_escape(id)
        ));
        gexf.push_str("        <attvalues>\n");
        gexf.push_str(&format!(
            "          <attvalue for=\"group\" value=\"{}\"/>\n",
            xml_escape(group)
        ));
        gexf.push_str(&format!(
            "          <attvalue for=\"influence\" value=\"{:.4}\"/>\n",
            analysis.score_of(id)
        ));
        gexf.push_str("        </attvalues>\n");
        gexf.push_str(&format!(
            "        <viz:color r=\"{}\" g=\"{}\" b=\"{}\"/>\n",
            color.r, color.g, color.b
        ));
        gexf.push_str("      </node>\n");
    }
    gexf.push_str("    </nodes>\n");

    gexf.push_str("    <edges>\n");
    for (idx, edge) in graph.edges.iter().enumerate() {
        let kind = match edge.edge_type {
            EdgeType::Mutual => "mutual",
            EdgeType::Follows => "directed",
        };
        gexf.push_str(&format!(
            "      <edge id=\"{}\" source=\"{}\" target=\"{}\" type=\"{}\" weight=\"{}\">\n",
            idx,
            xml_escape(&edge.source),
            xml_escape(&edge.target),
            kind,
            edge.weight
        ));
        gexf.push_str(&format!(
            "        <attvalues><attvalue for=\"type\" value=\"{}\"/></attvalues>\n",
            edge.edge_type.as_str()
        ));
        gexf.push_str("      </edge>\n");
    }
    gexf.push_str("    </edges>\n");
    gexf.push_str("  </graph>\n");
    gexf.push_str("</gexf>\n");

    gexf
}

const LAYOUT_SCRIPT: &str = include_str!("../assets/force-layout.js");

const HTML_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>__TITLE__</title>
<style>
  body { margin: 0; font-family: system-ui, sans-serif; background: #10131a; color: #e6e6e6; }
  header { padding: 12px 16px; }
  svg { width: 100vw; height: calc(100vh - 56px); display: block; }
  line.mutual { stroke: #9aa4b5; stroke-width: 2px; }
  line.follows { stroke: #566070; stroke-width: 1px; }
  text { font-size: 10px; fill: #e6e6e6; pointer-events: none; }
</style>
</head>
<body>
<header><strong>__TITLE__</strong> &middot; __SUMMARY__</header>
<svg id="graph"></svg>
<script id="graph-data" type="application/json">__GRAPH_DATA__</script>
<script id="cluster-colors" type="application/json">__COLORS__</script>
<script>
__LAYOUT__
</script>
</body>
</html>
"##;

/// JSON safe to place inside a `<script>` element.
fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/")
}

pub fn generate_html(graph: &Graph, analysis: &AnalysisResult) -> Result<String, serde_json::Error> {
    let d3 = build_d3_graph(graph, analysis);
    let colors: BTreeMap<&str, String> = d3
        .nodes
        .iter()
        .map(|n| (n.group.as_str(), cluster_color(&n.group).hex()))
        .collect();

    let title = xml_escape(&format!("Orbit: {}", graph.seed));
    let summary = format!(
        "{} accounts, {} connections, {} clusters{}",
        graph.node_count(),
        graph.edges.len(),
        colors.len(),
        if graph.truncated { " (truncated)" } else { "" }
    );

    Ok(HTML_TEMPLATE
        .replace("__LAYOUT__", LAYOUT_SCRIPT)
        .replace("__TITLE__", &title)
        .replace("__SUMMARY__", &summary)
        .replace("__COLORS__", &script_safe(&serde_json::to_string(&colors)?))
        .replace("__GRAPH_DATA__", &script_safe(&serde_json::to_string(&d3)?)))
}

pub fn visualize(
    graph: &Graph,
    analysis: &AnalysisResult,
    format: ExportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ExportFormat::D3 => generate_d3(graph, analysis),
        ExportFormat::Gexf => Ok(generate_gexf(graph, analysis)),
        ExportFormat::Html => generate_html(graph, analysis),
    }
}

pub fn save_visualization(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_color_is_stable() {
        assert_eq!(cluster_color("bob"), cluster_color("bob"));
        assert_eq!(cluster_color("bob").hex().len(), 7);
    }

    #[test]
    fn test_hsl_primaries() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), ClusterColor { r: 255, g: 0, b: 0 });
        assert_eq!(hsl_to_rgb(120.0, 1.0, 0.5), ClusterColor { r: 0, g: 255, b: 0 });
        assert_eq!(hsl_to_rgb(240.0, 1.0, 0.5), ClusterColor { r: 0, g: 0, b: 255 });
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }

    #[test]
    fn test_script_safe_breaks_closing_tags() {
        assert_eq!(script_safe(r#"{"bio":"</script>"}"#), r#"{"bio":"<\/script>"}"#);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(ExportFormat::from_str("D3"), Some(ExportFormat::D3));
        assert_eq!(ExportFormat::from_str(" gexf "), Some(ExportFormat::Gexf));
        assert_eq!(ExportFormat::from_str("html"), Some(ExportFormat::Html));
        assert_eq!(ExportFormat::from_str("svg"), None);
    }
}

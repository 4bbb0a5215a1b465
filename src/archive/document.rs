//! XML documents stored as archive entries.
//!
//! Every cross-entity link is an ID string. Attributes carry IDs and
//! scalars; child elements carry residues and nested records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Document format version written to every entry.
pub const FORMAT_VERSION: &str = "1";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

fn default_true() -> bool {
    true
}

fn default_ratio() -> u32 {
    1
}

fn default_gap() -> String {
    "-".to_string()
}

fn default_font() -> String {
    "SansSerif".to_string()
}

fn default_font_size() -> u32 {
    12
}

fn default_height() -> u32 {
    40
}

/// Serialize a document with an XML declaration.
pub fn to_xml<T: Serialize>(entry: &str, doc: &T) -> Result<String> {
    let body = quick_xml::se::to_string(doc).map_err(|e| ArchiveError::xml(entry, e))?;
    Ok(format!("{XML_DECLARATION}{body}\n"))
}

/// Parse a document.
pub fn from_xml<T: DeserializeOwned>(entry: &str, text: &str) -> Result<T> {
    quick_xml::de::from_str(text).map_err(|e| ArchiveError::xml(entry, e))
}

/// Name of the root element, without parsing the whole document.
pub fn root_element(text: &str) -> Option<&str> {
    let mut rest = text;
    loop {
        let start = rest.find('<')?;
        rest = &rest[start + 1..];
        if rest.starts_with('?') || rest.starts_with('!') {
            continue;
        }
        let end = rest.find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
        return Some(&rest[..end]);
    }
}

/// The dataset alignment shared by one or more views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "dataset")]
pub struct DatasetDoc {
    #[serde(rename = "@version", default)]
    pub version: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type", default)]
    pub molecule: String,
    #[serde(rename = "sequence", default)]
    pub sequences: Vec<SequenceDoc>,
    #[serde(rename = "codonFrame", default)]
    pub codon_frames: Vec<CodonFrameDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@start")]
    pub start: usize,
    #[serde(rename = "@end")]
    pub end: usize,
    /// Dataset sequence ID; present on view sequences only.
    #[serde(rename = "@dsRef", default, skip_serializing_if = "Option::is_none")]
    pub dataset_ref: Option<String>,
    #[serde(rename = "@description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub residues: String,
    #[serde(rename = "dbRef", default)]
    pub db_refs: Vec<DbRefDoc>,
    #[serde(rename = "pdb", default)]
    pub structures: Vec<PdbDoc>,
    #[serde(rename = "feature", default)]
    pub features: Vec<FeatureDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbRefDoc {
    #[serde(rename = "@source")]
    pub source: String,
    #[serde(rename = "@version", default)]
    pub version: String,
    #[serde(rename = "@accession")]
    pub accession: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<MappingDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDoc {
    /// Target sequence ID. Frequently names a sequence declared later.
    #[serde(rename = "@to", default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "@fromRatio", default = "default_ratio")]
    pub from_ratio: u32,
    #[serde(rename = "@toRatio", default = "default_ratio")]
    pub to_ratio: u32,
    #[serde(rename = "mapFrom", default)]
    pub from: Vec<RangeDoc>,
    #[serde(rename = "mapTo", default)]
    pub to_ranges: Vec<RangeDoc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeDoc {
    #[serde(rename = "@start")]
    pub start: i64,
    #[serde(rename = "@end")]
    pub end: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodonFrameDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "alcodMap", default)]
    pub maps: Vec<CodonMapDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodonMapDoc {
    /// Nucleotide dataset sequence ID.
    #[serde(rename = "@dnasq")]
    pub dna: String,
    /// Mapping onto the protein product (`to` names the protein).
    pub mapping: MappingDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdbDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@chain", default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    /// Original location of the coordinate file.
    #[serde(rename = "@file", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Archive entry holding a copy of the coordinate file.
    #[serde(rename = "@entry", default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDoc {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@begin")]
    pub begin: usize,
    #[serde(rename = "@end")]
    pub end: usize,
    #[serde(rename = "@description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "@score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// One alignment view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "view")]
pub struct ViewDoc {
    #[serde(rename = "@version", default)]
    pub version: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@sequenceSetId")]
    pub sequence_set_id: String,
    #[serde(rename = "@datasetId")]
    pub dataset_id: String,
    #[serde(rename = "@title", default)]
    pub title: String,
    #[serde(rename = "@type", default)]
    pub molecule: String,
    #[serde(rename = "@gapChar", default = "default_gap")]
    pub gap_char: String,
    #[serde(rename = "@complementId", default, skip_serializing_if = "Option::is_none")]
    pub complement_id: Option<String>,
    #[serde(rename = "@gatherViews", default)]
    pub gather_views: bool,
    #[serde(rename = "property", default)]
    pub properties: Vec<PropertyDoc>,
    #[serde(rename = "sequence", default)]
    pub sequences: Vec<SequenceDoc>,
    #[serde(rename = "annotation", default)]
    pub annotations: Vec<AnnotationDoc>,
    #[serde(rename = "group", default)]
    pub groups: Vec<GroupDoc>,
    #[serde(default)]
    pub viewport: ViewportDoc,
    #[serde(rename = "viewer", default)]
    pub viewers: Vec<ViewerLinkDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDoc {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@label")]
    pub label: String,
    #[serde(rename = "@description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "@calcId", default, skip_serializing_if = "Option::is_none")]
    pub calc_id: Option<String>,
    #[serde(rename = "@autoCalculated", default)]
    pub auto_calculated: bool,
    #[serde(rename = "@visible", default = "default_true")]
    pub visible: bool,
    #[serde(rename = "@height", default = "default_height")]
    pub height: u32,
    #[serde(rename = "@graph", default)]
    pub graph: String,
    #[serde(rename = "@score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// View sequence this row annotates.
    #[serde(rename = "@seqRef", default, skip_serializing_if = "Option::is_none")]
    pub sequence_ref: Option<String>,
    /// Group this row annotates; the group may appear later in the entry.
    #[serde(rename = "@groupRef", default, skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdDoc>,
    #[serde(rename = "element", default)]
    pub elements: Vec<AnnotationElementDoc>,
}

impl Default for AnnotationDoc {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            description: None,
            calc_id: None,
            auto_calculated: false,
            visible: true,
            height: default_height(),
            graph: String::new(),
            score: None,
            sequence_ref: None,
            group_ref: None,
            threshold: None,
            elements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDoc {
    #[serde(rename = "@value")]
    pub value: f32,
    #[serde(rename = "@label", default)]
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationElementDoc {
    #[serde(rename = "@position")]
    pub position: usize,
    #[serde(rename = "@displayCharacter", default, skip_serializing_if = "Option::is_none")]
    pub display_char: Option<String>,
    #[serde(rename = "@secondaryStructure", default, skip_serializing_if = "Option::is_none")]
    pub secondary_structure: Option<String>,
    #[serde(rename = "@value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f32>,
    #[serde(rename = "@description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@start")]
    pub start: usize,
    #[serde(rename = "@end")]
    pub end: usize,
    #[serde(rename = "@colourScheme", default, skip_serializing_if = "Option::is_none")]
    pub colour_scheme: Option<String>,
    #[serde(rename = "@outlineColour", default)]
    pub outline_colour: u32,
    #[serde(rename = "@displayBoxes", default = "default_true")]
    pub display_boxes: bool,
    #[serde(rename = "@displayText", default = "default_true")]
    pub display_text: bool,
    #[serde(rename = "@colourText", default)]
    pub colour_text: bool,
    #[serde(rename = "seq", default)]
    pub members: Vec<MemberDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberDoc {
    #[serde(rename = "@id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportDoc {
    #[serde(rename = "@colourScheme", default, skip_serializing_if = "Option::is_none")]
    pub colour_scheme: Option<String>,
    #[serde(rename = "@wrap", default)]
    pub wrap: bool,
    #[serde(rename = "@showAnnotation", default = "default_true")]
    pub show_annotation: bool,
    #[serde(rename = "@fontName", default = "default_font")]
    pub font_name: String,
    #[serde(rename = "@fontSize", default = "default_font_size")]
    pub font_size: u32,
    #[serde(rename = "@fontStyle", default)]
    pub font_style: u32,
    #[serde(rename = "@startRes", default)]
    pub start_res: usize,
    #[serde(rename = "@startSeq", default)]
    pub start_seq: usize,
    #[serde(rename = "@x", default)]
    pub x: i32,
    #[serde(rename = "@y", default)]
    pub y: i32,
    #[serde(rename = "@width", default)]
    pub width: u32,
    #[serde(rename = "@height", default)]
    pub height: u32,
    #[serde(rename = "hiddenColumns", default)]
    pub hidden_columns: Vec<ColumnRangeDoc>,
    #[serde(rename = "hiddenSeq", default)]
    pub hidden_sequences: Vec<MemberDoc>,
    #[serde(rename = "featureSetting", default)]
    pub feature_settings: Vec<FeatureSettingDoc>,
}

impl Default for ViewportDoc {
    fn default() -> Self {
        Self {
            colour_scheme: None,
            wrap: false,
            show_annotation: true,
            font_name: default_font(),
            font_size: default_font_size(),
            font_style: 0,
            start_res: 0,
            start_seq: 0,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            hidden_columns: Vec::new(),
            hidden_sequences: Vec::new(),
            feature_settings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRangeDoc {
    #[serde(rename = "@start")]
    pub start: usize,
    #[serde(rename = "@end")]
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSettingDoc {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@colour", default)]
    pub colour: u32,
    #[serde(rename = "@display", default = "default_true")]
    pub display: bool,
}

/// A view's reference to an external viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerLinkDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@kind")]
    pub kind: String,
    #[serde(rename = "@title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Inline state (Newick text for tree viewers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "seqMap", default)]
    pub sequences: Vec<ViewerSeqDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerSeqDoc {
    #[serde(rename = "@seq")]
    pub seq: String,
    #[serde(rename = "@model", default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "@chain", default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_element() {
        assert_eq!(root_element("<?xml version=\"1.0\"?>\n<view id=\"a\">"), Some("view"));
        assert_eq!(root_element("<dataset/>"), Some("dataset"));
        assert_eq!(root_element("no markup"), None);
    }

    #[test]
    fn test_view_document_attributes() {
        let doc = ViewDoc {
            version: FORMAT_VERSION.to_string(),
            id: "V1".to_string(),
            sequence_set_id: "set1".to_string(),
            dataset_id: "ds1".to_string(),
            title: "prot <1>".to_string(),
            molecule: "protein".to_string(),
            gap_char: "-".to_string(),
            complement_id: Some("V2".to_string()),
            sequences: vec![SequenceDoc {
                id: "sq1".to_string(),
                name: "p1".to_string(),
                start: 1,
                end: 3,
                dataset_ref: Some("sq0".to_string()),
                residues: "MK-L".to_string(),
                ..SequenceDoc::default()
            }],
            ..ViewDoc::default()
        };
        let xml = to_xml("v.xml", &doc).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("complementId=\"V2\""));
        assert!(xml.contains("<residues>MK-L</residues>"));
        assert_eq!(root_element(&xml), Some("view"));

        let parsed: ViewDoc = from_xml("v.xml", &xml).unwrap();
        assert_eq!(parsed.title, "prot <1>");
        assert_eq!(parsed.sequences[0].dataset_ref.as_deref(), Some("sq0"));
        assert!(parsed.viewport.show_annotation);
    }

    #[test]
    fn test_malformed_document_is_error() {
        let result: Result<ViewDoc> = from_xml("bad.xml", "<view><sequence></view>");
        assert!(matches!(result, Err(ArchiveError::Xml { .. })));
    }
}

//! UI element groups and the render boundary
//!
//! Content shown on a selection is decomposed into ordered groups of
//! consecutive same-tag elements. The engine only makes grouping and
//! placement decisions; producing markup and driving emulators belongs to a
//! [`Renderer`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{Device, DeviceId};

/// Tags that never carry a closing tag in HTML
const VOID_TAGS: [&str; 4] = ["IMG", "BR", "HR", "INPUT"];

/// One element of shown content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiItem {
    pub id: Option<String>,
    pub src: Option<String>,
    pub value: Option<String>,
    /// Inner text of the element
    pub html: String,
}

/// Consecutive elements sharing a tag (e.g. a row of buttons)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiGroup {
    /// Upper-case tag name (`BUTTON`, `IMG`, `P`, ...)
    pub tag: String,
    pub members: Vec<UiItem>,
}

impl UiGroup {
    /// A single paragraph of plain text
    pub fn text(text: &str) -> Self {
        Self {
            tag: "P".to_string(),
            members: vec![UiItem {
                html: text.to_string(),
                ..Default::default()
            }],
        }
    }

    pub fn is_image(&self) -> bool {
        self.tag == "IMG"
    }

    pub fn contains(&self, element_id: &str) -> bool {
        self.members
            .iter()
            .any(|item| item.id.as_deref() == Some(element_id))
    }

    /// Set `src`, `value`, or `html` on the member with the given id
    pub fn update_attr(&mut self, element_id: &str, attr: &str, value: &str) -> bool {
        let Some(item) = self
            .members
            .iter_mut()
            .find(|item| item.id.as_deref() == Some(element_id))
        else {
            return false;
        };
        match attr {
            "src" => item.src = Some(value.to_string()),
            "value" => item.value = Some(value.to_string()),
            "html" => item.html = value.to_string(),
            _ => return false,
        }
        true
    }
}

/// Decomposed content, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContent {
    pub groups: Vec<UiGroup>,
}

impl UiContent {
    pub fn new(groups: Vec<UiGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Indexes of the groups with a tag
    pub fn rows(&self, tag: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.tag == tag)
            .map(|(i, _)| i)
            .collect()
    }

    /// Largest button row, used to size buttons on a panel
    pub fn max_buttons(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.tag == "BUTTON")
            .map(|g| g.members.len())
            .max()
            .unwrap_or(0)
    }

    fn push(&mut self, tag: String, item: UiItem) {
        match self.groups.last_mut() {
            Some(group) if group.tag == tag => group.members.push(item),
            _ => self.groups.push(UiGroup {
                tag,
                members: vec![item],
            }),
        }
    }
}

/// Render and emulator boundary
pub trait Renderer: Send {
    /// Split markup into element groups
    fn decompose(&self, markup: &str) -> UiContent;

    /// Markup for one group
    fn render(&self, group: &UiGroup) -> String;

    /// Wrap rendered markup into a device panel
    fn render_panel(&self, markup: &str, content: &UiContent) -> String;

    /// Reflect an input event on an emulated device
    fn apply_visual(&mut self, device: &DeviceId, event: &str);

    /// Display content on a device
    fn show_ui(&mut self, device: &Device, content: &str);
}

/// Panel layout used by [`MarkupRenderer::render_panel`]
#[derive(Debug, Clone)]
pub struct PanelSetup {
    pub id: String,
    pub max_h: u32,
    pub min_h: u32,
    pub max_w: u32,
    pub font_size: u32,
}

impl Default for PanelSetup {
    fn default() -> Self {
        Self {
            id: "rootPanel".to_string(),
            max_h: 70,
            min_h: 15,
            max_w: 95,
            font_size: 40,
        }
    }
}

/// Renderer for flat HTML-like fragments
#[derive(Debug, Clone, Default)]
pub struct MarkupRenderer {
    pub panel: PanelSetup,
}

impl MarkupRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for MarkupRenderer {
    fn decompose(&self, markup: &str) -> UiContent {
        let trimmed = markup.trim();
        if trimmed.is_empty() {
            return UiContent::default();
        }
        if !trimmed.starts_with('<') {
            return UiContent::new(vec![UiGroup::text(trimmed)]);
        }
        match parse_elements(trimmed) {
            Ok(content) => content,
            Err(e) => {
                debug!(error = %e, "Markup is not well-formed, showing it as text");
                UiContent::new(vec![UiGroup::text(trimmed)])
            }
        }
    }

    fn render(&self, group: &UiGroup) -> String {
        let tag = group.tag.to_lowercase();
        let mut html = String::new();
        for item in &group.members {
            html.push('<');
            html.push_str(&tag);
            if let Some(id) = &item.id {
                html.push_str(&format!(" id=\"{}\"", id));
            }
            if let Some(src) = &item.src {
                html.push_str(&format!(" src=\"{}\"", src));
            }
            if let Some(value) = &item.value {
                html.push_str(&format!(" value=\"{}\"", value));
            }
            html.push_str(&format!(">{}</{}>", item.html, tag));
        }
        html
    }

    fn render_panel(&self, markup: &str, content: &UiContent) -> String {
        if markup.is_empty() {
            return String::new();
        }
        let id = &self.panel.id;
        let mut style = format!(
            "<style>#{id} {{height:100%;padding:5px;text-align:center;}}\
             #{id} img {{max-width:100%;max-height:100%;height:auto;}}"
        );

        let p_height = 10;
        let p_rows = content.rows("P").len() as u32;
        if p_rows > 0 {
            style.push_str(&format!("#{id} p {{height:{p_height}%;margin-bottom:5px;}}"));
        }
        let max_buttons = content.max_buttons() as u32;
        if max_buttons > 0 {
            let available = self.panel.max_h.saturating_sub(p_rows * p_height);
            let height = (available / max_buttons).max(self.panel.min_h);
            style.push_str(&format!(
                "#{id} button {{width:{}%;height:{}%;margin-bottom:5px;font-size:{}px;}}",
                self.panel.max_w, height, self.panel.font_size
            ));
        }
        style.push_str("</style>");

        format!("<div id=\"{id}\">{style}{markup}</div>")
    }

    fn apply_visual(&mut self, device: &DeviceId, event: &str) {
        debug!(device = %device, event = %event, "Apply event visual");
    }

    fn show_ui(&mut self, device: &Device, content: &str) {
        debug!(device = %device.id, bytes = content.len(), "Show UI");
    }
}

fn parse_elements(markup: &str) -> Result<UiContent, quick_xml::Error> {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.trim_text(true);
    // Void tags such as <img> may appear unclosed
    config.check_end_names = false;

    // An outer <div> is a wrapper; its children are the items
    let item_depth = if markup.starts_with("<div") { 1 } else { 0 };
    let mut content = UiContent::default();
    let mut depth = 0usize;
    let mut current: Option<(String, UiItem)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let (tag, item) = element(&e)?;
                let is_void = VOID_TAGS.contains(&tag.as_str());
                if depth == item_depth {
                    if is_void {
                        content.push(tag, item);
                        continue;
                    }
                    current = Some((tag, item));
                }
                if !is_void {
                    depth += 1;
                }
            }
            Event::Empty(e) => {
                if depth == item_depth {
                    let (tag, item) = element(&e)?;
                    content.push(tag, item);
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == item_depth {
                    if let Some((tag, item)) = current.take() {
                        content.push(tag, item);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some((_, item)) = current.as_mut() {
                    item.html.push_str(&text);
                } else if depth == item_depth && !text.is_empty() {
                    content.push("P".to_string(), UiGroup::text(&text).members.remove(0));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(content)
}

fn element(e: &BytesStart<'_>) -> Result<(String, UiItem), quick_xml::Error> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).to_uppercase();
    let mut item = UiItem::default();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"id" => item.id = Some(value),
            b"src" => item.src = Some(value),
            b"value" => item.value = Some(value),
            _ => {}
        }
    }
    Ok((tag, item))
}

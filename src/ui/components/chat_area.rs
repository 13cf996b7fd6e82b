use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use eframe::egui;
use egui::load::SizedTexture;

use crate::common::{Identity, Message, MessageKind};

const MAX_PREVIEW_SIDE: f32 = 320.0;

enum Preview {
    Image(egui::TextureHandle),
    Undecodable,
}

/// Decoded image textures keyed by position in the history.
#[derive(Default)]
pub struct PreviewCache {
    entries: HashMap<usize, Preview>,
}

impl PreviewCache {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn get_or_load(&mut self, ctx: &egui::Context, index: usize, message: &Message) -> &Preview {
        self.entries.entry(index).or_insert_with(|| {
            match decode_data_url(&message.content).and_then(|bytes| load_image(&bytes)) {
                Some(image) => Preview::Image(ctx.load_texture(
                    format!("message-image-{index}"),
                    image,
                    egui::TextureOptions::LINEAR,
                )),
                None => {
                    log::debug!("Message {index} from {} is not a decodable image", message.sender);
                    Preview::Undecodable
                }
            }
        })
    }
}

pub fn render(
    ui: &mut egui::Ui,
    messages: &[Message],
    local: Option<&Identity>,
    previews: &mut PreviewCache,
) {
    egui::ScrollArea::vertical()
        .stick_to_bottom(true)
        .auto_shrink([false, false])
        .show(ui, |ui| {
            for (index, message) in messages.iter().enumerate() {
                let own = local == Some(&message.sender);
                let color = if own {
                    egui::Color32::LIGHT_BLUE
                } else {
                    egui::Color32::LIGHT_GRAY
                };
                match message.kind {
                    MessageKind::Text => {
                        ui.horizontal_wrapped(|ui| {
                            ui.colored_label(color, format!("{}:", message.sender));
                            ui.label(&message.content);
                        });
                    }
                    MessageKind::Image => {
                        ui.colored_label(color, format!("{}:", message.sender));
                        match previews.get_or_load(ui.ctx(), index, message) {
                            Preview::Image(texture) => {
                                ui.add(egui::Image::new(SizedTexture::from_handle(texture)));
                            }
                            Preview::Undecodable => {
                                ui.label(egui::RichText::new(media_label(message)).italics());
                            }
                        }
                    }
                    MessageKind::Video => {
                        ui.horizontal_wrapped(|ui| {
                            ui.colored_label(color, format!("{}:", message.sender));
                            ui.label(egui::RichText::new(media_label(message)).italics());
                        });
                    }
                }
            }
        });
}

/// Bytes carried by a `data:<type>;base64,<payload>` URL.
fn decode_data_url(content: &str) -> Option<Vec<u8>> {
    let (header, payload) = content.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    STANDARD.decode(payload).ok()
}

/// Decodes an image and scales it down to fit the chat column.
fn load_image(bytes: &[u8]) -> Option<egui::ColorImage> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let (width, height) = (decoded.width(), decoded.height());
    let scale = (MAX_PREVIEW_SIDE / width.max(height).max(1) as f32).min(1.0);
    let decoded = if scale < 1.0 {
        decoded.resize(
            ((width as f32 * scale) as u32).max(1),
            ((height as f32 * scale) as u32).max(1),
            image::imageops::FilterType::Triangle,
        )
    } else {
        decoded
    };
    let rgba = decoded.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    Some(egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw()))
}

/// `[video/mp4, 12 KB]` style summary of an inline data URL.
fn media_label(message: &Message) -> String {
    let content_type = message
        .content
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .unwrap_or(message.kind.as_str());
    let payload = message
        .content
        .split_once(',')
        .map(|(_, data)| data.len())
        .unwrap_or(0);
    // base64 carries 3 bytes per 4 characters
    let kilobytes = (payload * 3 / 4).div_ceil(1024);
    format!("[{content_type}, {kilobytes} KB]")
}

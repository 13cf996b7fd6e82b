use std::path::PathBuf;

use eframe::egui;
use tokio::sync::mpsc;

use crate::common::{SessionCommand, SessionEvent};
use crate::session::MediaFile;
use crate::storage::ClientDatabase;

use super::components::{chat_area, debug_panel, input_bar, login, sidebar};
use super::state::AppState;

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<SessionCommand>,
    event_receiver: mpsc::Receiver<SessionEvent>,
    database: Option<ClientDatabase>,
    previews: chat_area::PreviewCache,
}

impl ChatApp {
    /// `initial_name` is registered right away, as after a page reload.
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        command_sender: mpsc::Sender<SessionCommand>,
        event_receiver: mpsc::Receiver<SessionEvent>,
        database: Option<ClientDatabase>,
        initial_name: Option<String>,
    ) -> Self {
        let mut app = Self {
            state: AppState::new(),
            command_sender,
            event_receiver,
            database,
            previews: chat_area::PreviewCache::default(),
        };
        if let Some(name) = initial_name {
            app.login(name);
        }
        app
    }

    fn handle_session_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            match event {
                SessionEvent::RegistrationFailed(_) => self.forget_username(),
                SessionEvent::HistoryCleared => self.previews.clear(),
                _ => {}
            }
            self.state.apply(event);
        }
    }

    fn send_command(&mut self, command: SessionCommand) {
        if let Err(err) = self.command_sender.try_send(command) {
            log::warn!("Failed to send command to session: {err}");
        }
    }

    fn login(&mut self, name: String) {
        let Some(name) = normalize_name(&name) else {
            log::warn!("Ignoring blank username");
            return;
        };
        if let Some(database) = &self.database {
            if let Err(err) = database.save_username(&name) {
                log::warn!("Failed to persist username: {err}");
            }
        }
        self.state.pending_name = Some(name.clone());
        self.send_command(SessionCommand::RegisterIdentity(name));
    }

    fn logout(&mut self) {
        self.forget_username();
        self.send_command(SessionCommand::Logout);
    }

    fn forget_username(&self) {
        if let Some(database) = &self.database {
            if let Err(err) = database.clear_username() {
                log::warn!("Failed to clear stored username: {err}");
            }
        }
    }

    fn send_file(&self, path: PathBuf) {
        let sender = self.command_sender.clone();
        tokio::spawn(async move {
            match MediaFile::open(&path).await {
                Ok(file) => {
                    if let Err(err) = sender.send(SessionCommand::SendFile(file)).await {
                        log::warn!("Failed to hand file to session: {err}");
                    }
                }
                Err(err) => log::warn!("Cannot open {}: {err}", path.display()),
            }
        });
    }

    fn render_login(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let notice = self.state.notice.clone();
            if let Some(name) = login::render(ui, &mut self.state.login_input, notice.as_deref()) {
                self.login(name);
            }
        });
    }

    fn render_chat(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Peer Chat");
                if ui.button("Logout").clicked() {
                    self.logout();
                }
            });
        });

        egui::SidePanel::left("peer_sidebar")
            .resizable(true)
            .default_width(200.0)
            .show(ctx, |ui| {
                if let Some(target) = sidebar::render(ui, &mut self.state) {
                    self.send_command(SessionCommand::Connect(target));
                }
            });

        egui::SidePanel::right("debug_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                debug_panel::render(ui, &self.state);
            });

        egui::TopBottomPanel::bottom("input_bar").show(ctx, |ui| {
            if let Some(notice) = &self.state.notice {
                ui.colored_label(egui::Color32::RED, notice);
            }
            let actions = input_bar::render(ui, &mut self.state.input_text, self.state.upload_progress);
            if let Some(text) = actions.text {
                self.send_command(SessionCommand::SendText(text));
            }
            if let Some(path) = actions.file {
                self.state.notice = None;
                self.send_file(path);
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            chat_area::render(
                ui,
                &self.state.messages,
                self.state.identity.as_ref(),
                &mut self.previews,
            );
        });
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_session_events();

        if self.state.is_logged_in() {
            self.render_chat(ctx);
        } else {
            self.render_login(ctx);
        }

        ctx.request_repaint();
    }
}

/// The form of a name that is registered and stored.
fn normalize_name(name: &str) -> Option<String> {
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_before_use() {
        assert_eq!(normalize_name("  alice \n").as_deref(), Some("alice"));
        assert_eq!(normalize_name(" \t "), None);
    }
}

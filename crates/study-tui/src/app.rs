use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use study_shared::api::{
    ChangeKind, ChangeNotice, ChangedTable, CreateTopicRequest, ScheduleRange, TopicListParams,
    UpdateProfileRequest, UpdateTopicRequest,
};
use study_shared::calendar::{assign_topics, CalendarDay, MonthGrid, YearMonth};
use study_shared::projection::{CategoryFilter, TopicQuery};
use study_shared::thread::build_forest;
use study_shared::{flatten_forest, Attachment, Category, Comment, CommentNode, Profile, TopicWithSchedules};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{pump_changes, ApiClient, DashboardMode, StreamEvent, UserPreferences};
use crate::editor::launch_external_editor;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Login,
    VerifyingAuth,
    Dashboard,
    TopicDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VimMode {
    Normal,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    Email,
    Password,
}

/// What a single-line prompt feeds into when submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    Search,
    NewTopic,
    Comment,
    Reply { parent_id: String },
    Title,
    Tags,
    Schedule,
    Upload { comment_id: Option<String> },
    Username,
}

impl PromptKind {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Search => " Search ",
            Self::NewTopic => " New Topic ",
            Self::Comment => " Comment ",
            Self::Reply { .. } => " Reply ",
            Self::Title => " Title ",
            Self::Tags => " Tags (comma separated) ",
            Self::Schedule => " Schedule (YYYY-MM-DD [YYYY-MM-DD]) ",
            Self::Upload { comment_id: None } => " Upload file ",
            Self::Upload { comment_id: Some(_) } => " Upload file to comment ",
            Self::Username => " Username ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingDelete {
    Topic { id: String, title: String },
    Comment { id: String },
}

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Tick,
    VerifyAuth,
    AuthSuccess,
    AuthFailed(String),
    ConnectChanges,
    Stream(StreamEvent),
    ChangeStreamClosed,
}

/// The topic open in the detail view.
pub struct TopicDetail {
    pub topic: TopicWithSchedules,
    pub comments: Vec<CommentNode>,
    pub attachments: Vec<Attachment>,
    pub selected_comment: usize,
}

impl TopicDetail {
    /// Comments in thread order with their nesting depth.
    pub fn comment_rows(&self) -> Vec<(usize, &Comment)> {
        flatten_forest(&self.comments)
    }

    pub fn selected(&self) -> Option<&Comment> {
        self.comment_rows()
            .into_iter()
            .nth(self.selected_comment)
            .map(|(_, c)| c)
    }

    fn clamp_selection(&mut self) {
        let rows = self.comment_rows().len();
        self.selected_comment = self.selected_comment.min(rows.saturating_sub(1));
    }
}

/// Parse "YYYY-MM-DD [YYYY-MM-DD]" into a range covering whole days in `tz`.
/// A single date schedules one day.
pub fn parse_schedule<Tz: TimeZone>(input: &str, tz: &Tz) -> Result<ScheduleRange, String> {
    let mut parts = input.split_whitespace();
    let start = parts.next().ok_or("Enter a start date")?;
    let end = parts.next().unwrap_or(start);
    if parts.next().is_some() {
        return Err("Expected a start date and an optional end date".to_string());
    }

    let parse = |raw: &str| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| format!("Invalid date: {}", raw))
    };
    let start = parse(start)?;
    let end = parse(end)?;
    if end < start {
        return Err("End date is before start date".to_string());
    }

    let last_second = NaiveTime::from_hms_opt(23, 59, 59).ok_or("Invalid time")?;
    let start_at = tz
        .from_local_datetime(&start.and_time(NaiveTime::MIN))
        .earliest()
        .ok_or("Start date does not exist in this time zone")?;
    let end_at = tz
        .from_local_datetime(&end.and_time(last_second))
        .latest()
        .ok_or("End date does not exist in this time zone")?;

    Ok(ScheduleRange::new(
        start_at.with_timezone(&Utc),
        end_at.with_timezone(&Utc),
    ))
}

pub fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Next concrete category; unknown categories restart the cycle.
pub fn next_category(category: Category) -> Category {
    let pos = Category::ALL.iter().position(|c| *c == category);
    match pos {
        Some(i) => Category::ALL[(i + 1) % Category::ALL.len()],
        None => Category::ALL[0],
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/").zip(dirs::home_dir()) {
        Some((rest, home)) => home.join(rest),
        None => PathBuf::from(path),
    }
}

pub struct App {
    pub api: ApiClient,
    pub view: View,
    pub vim_mode: VimMode,

    // Loading state
    pub loading: bool,
    pub loading_message: String,
    pub error_message: Option<String>,
    pub status_message: Option<String>,

    // Current user
    pub user: Option<Profile>,

    // Login form
    pub login_email: String,
    pub login_password: String,
    pub login_field: InputField,

    // Dashboard state
    pub topics: Vec<TopicWithSchedules>,
    pub query: TopicQuery,
    pub mode: DashboardMode,
    pub selected_topic: usize,
    pub selected_day: NaiveDate,
    pub selected_day_topic: usize,

    // Detail state
    pub detail: Option<TopicDetail>,

    // Overlays
    pub prompt: Option<Prompt>,
    pub confirm_delete: Option<PendingDelete>,

    // Flag to clear terminal after external editor
    pub needs_terminal_clear: bool,

    changes_task: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(api: ApiClient, has_tokens: bool, preferences: UserPreferences) -> Self {
        let view = if has_tokens {
            View::VerifyingAuth
        } else {
            View::Login
        };

        Self {
            api,
            view,
            vim_mode: VimMode::Normal,
            loading: false,
            loading_message: String::new(),
            error_message: None,
            status_message: None,
            user: None,
            login_email: String::new(),
            login_password: String::new(),
            login_field: InputField::Email,
            topics: Vec::new(),
            query: TopicQuery {
                category: preferences.category,
                search: String::new(),
                sort: preferences.sort,
            },
            mode: preferences.mode,
            selected_topic: 0,
            selected_day: Local::now().date_naive(),
            selected_day_topic: 0,
            detail: None,
            prompt: None,
            confirm_delete: None,
            needs_terminal_clear: false,
            changes_task: None,
        }
    }

    pub fn set_loading(&mut self, loading: bool, message: &str) {
        self.loading = loading;
        self.loading_message = message.to_string();
    }

    pub fn set_error(&mut self, message: String) {
        self.error_message = Some(message);
    }

    pub fn clear_error(&mut self) {
        self.error_message = None;
    }

    fn set_status(&mut self, message: &str) {
        self.status_message = Some(message.to_string());
    }

    // ============ Derived state ============

    /// The dashboard's topics after category filter, search and sort.
    pub fn visible_topics(&self) -> Vec<&TopicWithSchedules> {
        self.query.apply(&self.topics)
    }

    pub fn month(&self) -> YearMonth {
        YearMonth::containing(self.selected_day)
    }

    pub fn calendar_days(&self) -> Vec<CalendarDay<'_>> {
        let visible = self.visible_topics();
        assign_topics(&MonthGrid::new(self.month()), &visible, &Local)
    }

    /// Visible topics scheduled on the cursor day.
    pub fn day_topics(&self) -> Vec<&TopicWithSchedules> {
        self.visible_topics()
            .into_iter()
            .filter(|t| t.is_on(self.selected_day, &Local))
            .collect()
    }

    fn selected_topic_id(&self) -> Option<String> {
        let topic = match self.mode {
            DashboardMode::List => self.visible_topics().into_iter().nth(self.selected_topic),
            DashboardMode::Calendar => self.day_topics().into_iter().nth(self.selected_day_topic),
        };
        topic.map(|t| t.topic.id.clone())
    }

    pub fn is_owner(&self, topic: &TopicWithSchedules) -> bool {
        self.api.user_id() == Some(topic.topic.created_by.as_str())
    }

    pub fn owns_comment(&self, comment: &Comment) -> bool {
        self.api.user_id() == Some(comment.user_id.as_str())
    }

    fn clamp_topic_selection(&mut self) {
        let visible = self.visible_topics().len();
        self.selected_topic = self.selected_topic.min(visible.saturating_sub(1));
        let on_day = self.day_topics().len();
        self.selected_day_topic = self.selected_day_topic.min(on_day.saturating_sub(1));
    }

    fn save_preferences(&self) {
        let prefs = UserPreferences {
            mode: self.mode,
            category: self.query.category,
            sort: self.query.sort,
        };
        if let Err(e) = prefs.save() {
            tracing::warn!("Failed to save preferences: {}", e);
        }
    }

    // ============ Dashboard navigation ============

    pub fn move_day(&mut self, forward: bool, days: u64) {
        let moved = if forward {
            self.selected_day.checked_add_days(Days::new(days))
        } else {
            self.selected_day.checked_sub_days(Days::new(days))
        };
        if let Some(day) = moved {
            self.selected_day = day;
            self.selected_day_topic = 0;
        }
    }

    pub fn shift_month(&mut self, forward: bool) {
        let month = if forward {
            self.month().next()
        } else {
            self.month().prev()
        };
        self.selected_day = month.first_day();
        self.selected_day_topic = 0;
    }

    pub fn move_up(&mut self) {
        if self.selected_topic > 0 {
            self.selected_topic -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if self.selected_topic < self.visible_topics().len().saturating_sub(1) {
            self.selected_topic += 1;
        }
    }

    pub fn cycle_category(&mut self) {
        self.query.category = self.query.category.cycle();
        self.clamp_topic_selection();
        self.save_preferences();
    }

    pub fn cycle_sort(&mut self) {
        self.query.sort = self.query.sort.cycle();
        self.save_preferences();
    }

    pub fn toggle_mode(&mut self) {
        self.mode = self.mode.toggle();
        self.save_preferences();
    }

    // ============ Key handling ============

    /// Handle key events, returns true if app should quit
    pub async fn handle_key(
        &mut self,
        key: KeyEvent,
        tx: mpsc::Sender<AppEvent>,
    ) -> Result<bool> {
        // Clear messages on any key press
        if self.error_message.is_some() && key.code != KeyCode::Esc {
            self.clear_error();
        }
        self.status_message = None;

        // Global quit with Ctrl+C
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(true);
        }

        if self.loading {
            return Ok(false);
        }

        if self.confirm_delete.is_some() {
            self.handle_confirm_key(key).await;
            return Ok(false);
        }

        if self.prompt.is_some() {
            self.handle_prompt_key(key).await;
            return Ok(false);
        }

        match self.view {
            View::Login => self.handle_login_key(key, tx).await,
            View::VerifyingAuth => Ok(false), // No input during verification
            View::Dashboard => self.handle_dashboard_key(key, tx).await,
            View::TopicDetail => {
                self.handle_detail_key(key).await;
                Ok(false)
            }
        }
    }

    async fn handle_login_key(
        &mut self,
        key: KeyEvent,
        tx: mpsc::Sender<AppEvent>,
    ) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') if self.vim_mode == VimMode::Normal => return Ok(true),
            KeyCode::Esc => {
                if self.vim_mode == VimMode::Insert {
                    self.vim_mode = VimMode::Normal;
                }
            }
            KeyCode::Char('i') if self.vim_mode == VimMode::Normal => {
                self.vim_mode = VimMode::Insert;
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.login_field = match self.login_field {
                    InputField::Email => InputField::Password,
                    InputField::Password => InputField::Email,
                };
            }
            KeyCode::Char('j') | KeyCode::Down if self.vim_mode == VimMode::Normal => {
                self.login_field = InputField::Password;
            }
            KeyCode::Char('k') | KeyCode::Up if self.vim_mode == VimMode::Normal => {
                self.login_field = InputField::Email;
            }
            KeyCode::Enter => {
                if !self.login_email.is_empty() && !self.login_password.is_empty() {
                    self.do_login(tx).await;
                }
            }
            KeyCode::Char(c) if self.vim_mode == VimMode::Insert => match self.login_field {
                InputField::Email => self.login_email.push(c),
                InputField::Password => self.login_password.push(c),
            },
            KeyCode::Backspace if self.vim_mode == VimMode::Insert => {
                match self.login_field {
                    InputField::Email => self.login_email.pop(),
                    InputField::Password => self.login_password.pop(),
                };
            }
            _ => {}
        }

        Ok(false)
    }

    async fn handle_dashboard_key(
        &mut self,
        key: KeyEvent,
        _tx: mpsc::Sender<AppEvent>,
    ) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('L') => self.do_logout(),
            KeyCode::Char('R') => self.load_topics().await,
            KeyCode::Char('v') => self.toggle_mode(),
            KeyCode::Char('f') => self.cycle_category(),
            KeyCode::Char('o') => self.cycle_sort(),
            KeyCode::Char('[') => self.shift_month(false),
            KeyCode::Char(']') => self.shift_month(true),
            KeyCode::Char('/') => self.open_prompt(PromptKind::Search, self.query.search.clone()),
            KeyCode::Char('n') => self.open_prompt(PromptKind::NewTopic, String::new()),
            KeyCode::Char('p') => {
                let current = self
                    .user
                    .as_ref()
                    .and_then(|u| u.username.clone())
                    .unwrap_or_default();
                self.open_prompt(PromptKind::Username, current);
            }
            KeyCode::Esc if !self.query.search.is_empty() => {
                self.query.search.clear();
                self.clamp_topic_selection();
            }
            KeyCode::Enter => {
                if let Some(id) = self.selected_topic_id() {
                    self.open_topic(&id).await;
                }
            }
            _ => match self.mode {
                DashboardMode::List => self.handle_list_key(key),
                DashboardMode::Calendar => self.handle_calendar_key(key),
            },
        }

        Ok(false)
    }

    fn handle_list_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => self.move_down(),
            KeyCode::Char('k') | KeyCode::Up => self.move_up(),
            KeyCode::Char('g') => self.selected_topic = 0,
            KeyCode::Char('G') => {
                self.selected_topic = self.visible_topics().len().saturating_sub(1);
            }
            _ => {}
        }
    }

    fn handle_calendar_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('h') | KeyCode::Left => self.move_day(false, 1),
            KeyCode::Char('l') | KeyCode::Right => self.move_day(true, 1),
            KeyCode::Char('k') | KeyCode::Up => self.move_day(false, 7),
            KeyCode::Char('j') | KeyCode::Down => self.move_day(true, 7),
            KeyCode::Char('t') => {
                self.selected_day = Local::now().date_naive();
                self.selected_day_topic = 0;
            }
            KeyCode::Tab => {
                let count = self.day_topics().len();
                if count > 0 {
                    self.selected_day_topic = (self.selected_day_topic + 1) % count;
                }
            }
            _ => {}
        }
    }

    async fn handle_detail_key(&mut self, key: KeyEvent) {
        let Some(detail) = self.detail.as_ref() else {
            self.view = View::Dashboard;
            return;
        };
        let is_owner = self.is_owner(&detail.topic);
        let selected = detail.selected().cloned();
        let rows = detail.comment_rows().len();

        let owner_only = matches!(
            key.code,
            KeyCode::Char('T' | 't' | 'g' | 'd' | 'a' | 'A' | 'D')
        );
        if owner_only && !is_owner {
            self.set_error("Only the topic's creator can change it".to_string());
            return;
        }

        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.close_detail(),
            KeyCode::Char('j') | KeyCode::Down => {
                if let Some(detail) = self.detail.as_mut() {
                    if detail.selected_comment + 1 < rows {
                        detail.selected_comment += 1;
                    }
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.selected_comment = detail.selected_comment.saturating_sub(1);
                }
            }
            KeyCode::Char('R') => self.reload_topic().await,
            KeyCode::Char('c') => self.open_prompt(PromptKind::Comment, String::new()),
            KeyCode::Char('r') => {
                if let Some(comment) = selected {
                    self.open_prompt(
                        PromptKind::Reply {
                            parent_id: comment.id,
                        },
                        String::new(),
                    );
                }
            }
            KeyCode::Char('E') => {
                if let Some(comment) = selected {
                    if self.owns_comment(&comment) {
                        self.edit_comment(comment).await;
                    } else {
                        self.set_error("You can only edit your own comments".to_string());
                    }
                }
            }
            KeyCode::Char('x') => {
                if let Some(comment) = selected {
                    if self.owns_comment(&comment) {
                        self.confirm_delete = Some(PendingDelete::Comment { id: comment.id });
                    } else {
                        self.set_error("You can only delete your own comments".to_string());
                    }
                }
            }
            KeyCode::Char('s') => self.cycle_status().await,
            KeyCode::Char('u') => {
                self.open_prompt(PromptKind::Upload { comment_id: None }, String::new())
            }
            KeyCode::Char('U') => {
                if let Some(comment) = selected {
                    self.open_prompt(
                        PromptKind::Upload {
                            comment_id: Some(comment.id),
                        },
                        String::new(),
                    );
                }
            }
            KeyCode::Char('T') => {
                let title = self.detail_topic().map(|t| t.topic.title.clone()).unwrap_or_default();
                self.open_prompt(PromptKind::Title, title);
            }
            KeyCode::Char('t') => {
                let tags = self
                    .detail_topic()
                    .map(|t| t.topic.tags.join(", "))
                    .unwrap_or_default();
                self.open_prompt(PromptKind::Tags, tags);
            }
            KeyCode::Char('a') => self.open_prompt(PromptKind::Schedule, String::new()),
            KeyCode::Char('g') => {
                if let Some(category) = self.detail_topic().map(|t| next_category(t.topic.category)) {
                    self.update_topic(UpdateTopicRequest {
                        category: Some(category),
                        ..Default::default()
                    })
                    .await;
                }
            }
            KeyCode::Char('d') => self.edit_description().await,
            KeyCode::Char('A') => {
                self.update_topic(UpdateTopicRequest {
                    schedules: Some(Vec::new()),
                    ..Default::default()
                })
                .await;
            }
            KeyCode::Char('D') => {
                self.confirm_delete = self.detail_topic().map(|t| PendingDelete::Topic {
                    id: t.topic.id.clone(),
                    title: t.topic.title.clone(),
                });
            }
            _ => {}
        }
    }

    async fn handle_confirm_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(pending) = self.confirm_delete.take() {
                    self.perform_delete(pending).await;
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.confirm_delete = None;
            }
            _ => {}
        }
    }

    fn open_prompt(&mut self, kind: PromptKind, input: String) {
        self.prompt = Some(Prompt { kind, input });
    }

    async fn handle_prompt_key(&mut self, key: KeyEvent) {
        let Some(prompt) = self.prompt.as_mut() else {
            return;
        };
        let live_search = prompt.kind == PromptKind::Search;

        match key.code {
            KeyCode::Esc => {
                if live_search {
                    self.query.search.clear();
                }
                self.prompt = None;
            }
            KeyCode::Enter => {
                if let Some(prompt) = self.prompt.take() {
                    self.submit_prompt(prompt).await;
                }
            }
            KeyCode::Backspace => {
                prompt.input.pop();
            }
            KeyCode::Char(c) => prompt.input.push(c),
            _ => {}
        }

        if live_search {
            if let Some(prompt) = self.prompt.as_ref() {
                self.query.search = prompt.input.clone();
            }
            self.clamp_topic_selection();
        }
    }

    async fn submit_prompt(&mut self, prompt: Prompt) {
        let input = prompt.input.trim().to_string();

        match prompt.kind {
            PromptKind::Search => {
                self.query.search = prompt.input;
                self.selected_topic = 0;
                self.selected_day_topic = 0;
            }
            PromptKind::NewTopic => self.create_topic(input).await,
            PromptKind::Comment => self.add_comment(input, None).await,
            PromptKind::Reply { parent_id } => self.add_comment(input, Some(parent_id)).await,
            PromptKind::Title => {
                self.update_topic(UpdateTopicRequest {
                    title: Some(input),
                    ..Default::default()
                })
                .await;
            }
            PromptKind::Tags => {
                self.update_topic(UpdateTopicRequest {
                    tags: Some(parse_tags(&input)),
                    ..Default::default()
                })
                .await;
            }
            PromptKind::Schedule => self.add_schedule(&input).await,
            PromptKind::Upload { comment_id } => {
                if !input.is_empty() {
                    self.upload(expand_home(&input), comment_id).await;
                }
            }
            PromptKind::Username => self.rename(input).await,
        }
    }

    // ============ Auth ============

    async fn do_login(&mut self, tx: mpsc::Sender<AppEvent>) {
        self.set_loading(true, "Logging in...");

        let email = self.login_email.clone();
        let password = self.login_password.clone();

        match self.api.login(&email, &password).await {
            Ok(user) => {
                self.user = Some(user);
                let _ = tx.send(AppEvent::AuthSuccess).await;
            }
            Err(e) => {
                let _ = tx.send(AppEvent::AuthFailed(e.to_string())).await;
            }
        }

        self.set_loading(false, "");
    }

    fn do_logout(&mut self) {
        if let Some(task) = self.changes_task.take() {
            task.abort();
        }
        if let Err(e) = self.api.logout() {
            tracing::warn!("Failed to remove stored tokens: {}", e);
        }
        self.user = None;
        self.topics.clear();
        self.detail = None;
        self.vim_mode = VimMode::Normal;
        self.view = View::Login;
    }

    pub async fn verify_auth(&mut self, tx: mpsc::Sender<AppEvent>) {
        self.set_loading(true, "Verifying authentication...");

        match self.api.me().await {
            Ok(user) => {
                self.user = Some(user);
                self.view = View::Dashboard;
                self.load_topics().await;
                self.connect_changes(tx).await;
            }
            Err(e) => {
                tracing::info!("Stored session rejected: {}", e);
                self.do_logout();
            }
        }

        self.set_loading(false, "");
    }

    pub async fn on_auth_success(&mut self, tx: mpsc::Sender<AppEvent>) {
        self.view = View::Dashboard;
        self.vim_mode = VimMode::Normal;
        self.login_password.clear();
        self.load_topics().await;
        self.connect_changes(tx).await;
    }

    pub fn on_auth_failed(&mut self, msg: String) {
        self.set_error(format!("Login failed: {}", msg));
        self.login_password.clear();
    }

    async fn rename(&mut self, username: String) {
        let req = UpdateProfileRequest {
            username: Some(username),
            avatar_url: None,
        };
        match self.api.update_profile(&req).await {
            Ok(profile) => {
                self.user = Some(profile);
                self.set_status("Profile updated");
                if self.detail.is_some() {
                    self.reload_comments().await;
                }
            }
            Err(e) => self.set_error(format!("Failed to update profile: {}", e)),
        }
    }

    // ============ Change stream ============

    /// Subscribe to the server's change stream; notices arrive as `AppEvent::Stream`.
    pub async fn connect_changes(&mut self, tx: mpsc::Sender<AppEvent>) {
        if let Some(task) = self.changes_task.take() {
            task.abort();
        }

        match self.api.open_change_stream().await {
            Ok(response) => {
                tracing::info!("Subscribed to change stream");
                self.changes_task = Some(tokio::spawn(async move {
                    let (stream_tx, mut stream_rx) = mpsc::channel(32);
                    let pump = tokio::spawn(pump_changes(response, stream_tx));

                    while let Some(event) = stream_rx.recv().await {
                        if tx.send(AppEvent::Stream(event)).await.is_err() {
                            pump.abort();
                            return;
                        }
                    }
                    let _ = tx.send(AppEvent::ChangeStreamClosed).await;
                }));
            }
            Err(e) => {
                tracing::warn!("Change stream unavailable: {}", e);
                schedule_reconnect(tx);
            }
        }
    }

    pub fn on_change_stream_closed(&mut self, tx: mpsc::Sender<AppEvent>) {
        self.changes_task = None;
        if self.view != View::Login {
            tracing::info!("Change stream closed, reconnecting");
            schedule_reconnect(tx);
        }
    }

    /// Reconnect after a drop. Anything missed meanwhile is refetched.
    pub async fn reconnect_changes(&mut self, tx: mpsc::Sender<AppEvent>) {
        if self.view == View::Login || !self.api.is_authenticated() {
            return;
        }
        self.connect_changes(tx).await;
        self.refresh_all().await;
    }

    pub async fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Resync => self.refresh_all().await,
            StreamEvent::Change(notice) => self.on_change(notice).await,
        }
    }

    async fn on_change(&mut self, notice: ChangeNotice) {
        tracing::debug!(?notice, "Change notice");
        let open_topic = self.detail.as_ref().map(|d| d.topic.topic.id.clone());

        match notice.table {
            ChangedTable::Topics => {
                self.load_topics().await;
                if open_topic.as_deref() == Some(notice.id.as_str()) {
                    if notice.kind == ChangeKind::Delete {
                        self.close_detail();
                        self.set_status("The open topic was deleted");
                    } else {
                        self.reload_topic().await;
                    }
                }
            }
            ChangedTable::Comments => {
                if open_topic.is_some() && open_topic == notice.topic_id {
                    self.reload_comments().await;
                }
            }
            ChangedTable::Attachments => {
                if open_topic.is_some() && open_topic == notice.topic_id {
                    self.reload_attachments().await;
                }
            }
        }
    }

    async fn refresh_all(&mut self) {
        self.load_topics().await;
        if self.detail.is_some() {
            self.reload_topic().await;
        }
    }

    // ============ Topics ============

    async fn load_topics(&mut self) {
        match self.api.list_topics(&TopicListParams::default()).await {
            Ok(topics) => {
                self.topics = topics;
                self.clamp_topic_selection();
            }
            Err(e) => self.set_error(format!("Failed to load topics: {}", e)),
        }
    }

    fn detail_topic(&self) -> Option<&TopicWithSchedules> {
        self.detail.as_ref().map(|d| &d.topic)
    }

    fn detail_topic_id(&self) -> Option<String> {
        self.detail_topic().map(|t| t.topic.id.clone())
    }

    fn close_detail(&mut self) {
        self.detail = None;
        self.view = View::Dashboard;
        self.clamp_topic_selection();
    }

    async fn open_topic(&mut self, topic_id: &str) {
        self.set_loading(true, "Loading topic...");

        let loaded = async {
            let topic = self.api.get_topic(topic_id).await?;
            let comments = build_forest(self.api.list_comments(topic_id).await?);
            let attachments = self.api.list_attachments(topic_id).await?;
            Ok::<_, crate::api::ApiError>(TopicDetail {
                topic,
                comments,
                attachments,
                selected_comment: 0,
            })
        }
        .await;

        match loaded {
            Ok(detail) => {
                self.detail = Some(detail);
                self.view = View::TopicDetail;
            }
            Err(e) => self.set_error(format!("Failed to open topic: {}", e)),
        }

        self.set_loading(false, "");
    }

    async fn reload_topic(&mut self) {
        let Some(topic_id) = self.detail_topic_id() else {
            return;
        };
        match self.api.get_topic(&topic_id).await {
            Ok(topic) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.topic = topic;
                }
            }
            Err(e) => {
                self.set_error(format!("Failed to reload topic: {}", e));
                return;
            }
        }
        self.reload_comments().await;
        self.reload_attachments().await;
    }

    async fn reload_comments(&mut self) {
        let Some(topic_id) = self.detail_topic_id() else {
            return;
        };
        match self.api.list_comments(&topic_id).await {
            Ok(comments) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.comments = build_forest(comments);
                    detail.clamp_selection();
                }
            }
            Err(e) => self.set_error(format!("Failed to load comments: {}", e)),
        }
    }

    async fn reload_attachments(&mut self) {
        let Some(topic_id) = self.detail_topic_id() else {
            return;
        };
        match self.api.list_attachments(&topic_id).await {
            Ok(attachments) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.attachments = attachments;
                }
            }
            Err(e) => self.set_error(format!("Failed to load attachments: {}", e)),
        }
    }

    async fn create_topic(&mut self, title: String) {
        if title.is_empty() {
            return;
        }
        // New topics start in the filtered category when there is one
        let category = match self.query.category {
            CategoryFilter::Only(c) if c != Category::Unknown => c,
            _ => Category::ALL[0],
        };
        let req = CreateTopicRequest {
            title,
            description: None,
            category,
            tags: Vec::new(),
            schedules: Vec::new(),
        };

        self.set_loading(true, "Creating topic...");
        let created = self.api.create_topic(&req).await;
        self.set_loading(false, "");

        match created {
            Ok(topic) => {
                self.load_topics().await;
                self.open_topic(&topic.topic.id).await;
            }
            Err(e) => self.set_error(format!("Failed to create topic: {}", e)),
        }
    }

    async fn update_topic(&mut self, req: UpdateTopicRequest) {
        let Some(topic_id) = self.detail_topic_id() else {
            return;
        };
        match self.api.update_topic(&topic_id, &req).await {
            Ok(topic) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.topic = topic;
                }
                self.load_topics().await;
            }
            Err(e) => self.set_error(format!("Failed to update topic: {}", e)),
        }
    }

    async fn cycle_status(&mut self) {
        let Some((topic_id, next)) = self
            .detail_topic()
            .map(|t| (t.topic.id.clone(), t.topic.status.next()))
        else {
            return;
        };
        match self.api.set_status(&topic_id, next).await {
            Ok(topic) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.topic.topic = topic;
                }
                self.load_topics().await;
            }
            Err(e) => self.set_error(format!("Failed to update status: {}", e)),
        }
    }

    async fn add_schedule(&mut self, input: &str) {
        let range = match parse_schedule(input, &Local) {
            Ok(range) => range,
            Err(e) => {
                self.set_error(e);
                return;
            }
        };
        let Some(topic) = self.detail_topic() else {
            return;
        };

        // Schedules are replaced wholesale, so send the existing ones too
        let mut schedules: Vec<ScheduleRange> = topic
            .topic_schedules
            .iter()
            .map(|s| ScheduleRange::new(s.start_date, s.end_date))
            .collect();
        schedules.push(range);

        self.update_topic(UpdateTopicRequest {
            schedules: Some(schedules),
            ..Default::default()
        })
        .await;
    }

    async fn edit_description(&mut self) {
        let current = self
            .detail_topic()
            .and_then(|t| t.topic.description.clone())
            .unwrap_or_default();

        let edited = launch_external_editor(&current, ".md");
        self.needs_terminal_clear = true;

        match edited {
            Ok(text) if text.trim() != current.trim() => {
                self.update_topic(UpdateTopicRequest {
                    description: Some(text),
                    ..Default::default()
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => self.set_error(format!("Editor error: {}", e)),
        }
    }

    // ============ Comments ============

    async fn add_comment(&mut self, content: String, parent_id: Option<String>) {
        let Some(topic_id) = self.detail_topic_id() else {
            return;
        };
        if content.is_empty() {
            return;
        }

        match self
            .api
            .create_comment(&topic_id, &content, parent_id.as_deref())
            .await
        {
            Ok(_) => self.reload_comments().await,
            Err(e) => self.set_error(format!("Failed to post comment: {}", e)),
        }
    }

    async fn edit_comment(&mut self, comment: Comment) {
        let edited = launch_external_editor(&comment.content, ".md");
        self.needs_terminal_clear = true;

        let text = match edited {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                self.set_error(format!("Editor error: {}", e));
                return;
            }
        };
        if text.is_empty() {
            self.set_error("Comment cannot be empty".to_string());
            return;
        }
        if text == comment.content {
            return;
        }

        match self.api.update_comment(&comment.id, &text).await {
            Ok(_) => self.reload_comments().await,
            Err(e) => self.set_error(format!("Failed to update comment: {}", e)),
        }
    }

    async fn perform_delete(&mut self, pending: PendingDelete) {
        match pending {
            PendingDelete::Topic { id, .. } => match self.api.delete_topic(&id).await {
                Ok(()) => {
                    self.close_detail();
                    self.load_topics().await;
                    self.set_status("Topic deleted");
                }
                Err(e) => self.set_error(format!("Failed to delete topic: {}", e)),
            },
            PendingDelete::Comment { id } => match self.api.delete_comment(&id).await {
                Ok(()) => self.reload_comments().await,
                Err(e) => self.set_error(format!("Failed to delete comment: {}", e)),
            },
        }
    }

    // ============ Attachments ============

    async fn upload(&mut self, path: PathBuf, comment_id: Option<String>) {
        let Some(topic_id) = self.detail_topic_id() else {
            return;
        };

        self.set_loading(true, "Uploading...");
        let uploaded = self
            .api
            .upload_attachment(&topic_id, &path, comment_id.as_deref())
            .await;
        self.set_loading(false, "");

        match uploaded {
            Ok(attachment) => {
                tracing::info!(file = %attachment.file_name(), "Uploaded attachment");
                self.set_status("File uploaded");
                self.reload_attachments().await;
            }
            Err(e) => self.set_error(format!("Upload failed: {}", e)),
        }
    }
}

fn schedule_reconnect(tx: mpsc::Sender<AppEvent>) {
    tokio::spawn(async move {
        tokio::time::sleep(RECONNECT_DELAY).await;
        let _ = tx.send(AppEvent::ConnectChanges).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_shared::{TopicSchedule, TopicStatus, Topic};

    fn topic(id: &str, title: &str, category: Category, day: u32) -> TopicWithSchedules {
        let at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
        TopicWithSchedules {
            topic: Topic {
                id: id.to_string(),
                title: title.to_string(),
                description: None,
                category,
                tags: vec!["rust".to_string()],
                status: TopicStatus::NotStarted,
                created_by: "owner".to_string(),
                created_at: at,
                updated_at: at,
            },
            topic_schedules: vec![TopicSchedule {
                id: format!("s-{id}"),
                topic_id: id.to_string(),
                start_date: at,
                end_date: at,
            }],
        }
    }

    fn app() -> App {
        let mut app = App::new(
            ApiClient::new("http://localhost:3000"),
            false,
            UserPreferences::default(),
        );
        app.topics = vec![
            topic("1", "Bevy ECS", Category::GameEngine, 4),
            topic("2", "Blender rigging", Category::ThreeDModeling, 10),
            topic("3", "Godot scenes", Category::GameEngine, 20),
        ];
        app
    }

    #[test]
    fn starts_on_login_without_tokens() {
        assert_eq!(app().view, View::Login);
    }

    #[test]
    fn visible_topics_follow_query() {
        let mut app = app();
        app.query.category = CategoryFilter::Only(Category::GameEngine);
        let titles: Vec<&str> = app.visible_topics().iter().map(|t| t.topic.title.as_str()).collect();
        assert_eq!(titles, ["Godot scenes", "Bevy ECS"]);

        app.query.search = "BEVY".to_string();
        assert_eq!(app.visible_topics().len(), 1);
    }

    #[test]
    fn list_selection_stays_in_bounds() {
        let mut app = app();
        for _ in 0..10 {
            app.move_down();
        }
        assert_eq!(app.selected_topic, 2);

        app.query.category = CategoryFilter::Only(Category::ThreeDModeling);
        app.clamp_topic_selection();
        assert_eq!(app.selected_topic, 0);
    }

    #[test]
    fn calendar_cursor_moves_across_months() {
        let mut app = app();
        app.selected_day = NaiveDate::from_ymd_opt(2024, 3, 30).unwrap();
        app.move_day(true, 7);
        assert_eq!(app.month(), YearMonth::new(2024, 4).unwrap());

        app.shift_month(false);
        assert_eq!(app.selected_day, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(app.calendar_days().len() % 7, 0);
    }

    #[test]
    fn schedule_input_covers_whole_days() {
        let range = parse_schedule("2024-03-01 2024-03-03", &Utc).unwrap();
        let (start, end) = range.complete().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 3, 23, 59, 59).unwrap());

        let single = parse_schedule("2024-03-01", &Utc).unwrap();
        assert!(single.complete().is_some());

        assert!(parse_schedule("2024-03-05 2024-03-01", &Utc).is_err());
        assert!(parse_schedule("tomorrow", &Utc).is_err());
        assert!(parse_schedule("", &Utc).is_err());
    }

    #[test]
    fn tags_are_split_and_trimmed() {
        assert_eq!(parse_tags(" rust, ecs ,, bevy "), ["rust", "ecs", "bevy"]);
        assert!(parse_tags(" , ").is_empty());
    }

    #[test]
    fn category_cycle_wraps() {
        let last = Category::ALL[Category::ALL.len() - 1];
        assert_eq!(next_category(last), Category::ALL[0]);
        assert_eq!(next_category(Category::Unknown), Category::ALL[0]);
    }

    #[test]
    fn detail_selection_uses_thread_order() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let comment = |id: &str, parent: Option<&str>| Comment {
            id: id.to_string(),
            topic_id: "1".to_string(),
            user_id: "owner".to_string(),
            parent_id: parent.map(str::to_string),
            content: id.to_string(),
            created_at: at,
            updated_at: at,
            profiles: None,
        };
        let forest = build_forest(vec![
            comment("a", None),
            comment("b", None),
            comment("a1", Some("a")),
        ]);
        let mut detail = TopicDetail {
            topic: topic("1", "Bevy ECS", Category::GameEngine, 4),
            comments: forest,
            attachments: Vec::new(),
            selected_comment: 1,
        };

        assert_eq!(detail.selected().map(|c| c.id.as_str()), Some("a1"));
        detail.selected_comment = 9;
        detail.clamp_selection();
        assert_eq!(detail.selected().map(|c| c.id.as_str()), Some("b"));
    }
}

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use quill_client::{
    AdminDashboard, AuthContext, ClientError, ClientResult, Comment, Credentials,
    FeedFilter, FeedLoader, FileStore, KeyValueStore, LoadOutcome, MutationOutcome, Post,
    PostDraft, QuillClient, Registration, SortField, SortOrder, ToggleOutcome, User,
    UserDashboard,
};
use tracing::{debug, warn};

mod logging;
mod settings;

use logging::init_logging;
use settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "quill-cli", version, about = "CLI клиент блог-платформы quill")]
struct Cli {
    /// Адрес сервера (по умолчанию QUILL_API_URL или http://127.0.0.1:8000).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Файл сессии (по умолчанию QUILL_SESSION_FILE или .quill_session.json).
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortArg {
    CreatedAt,
    Views,
    Likes,
    Comments,
    Title,
}

impl From<SortArg> for SortField {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::CreatedAt => SortField::CreatedAt,
            SortArg::Views => SortField::Views,
            SortArg::Likes => SortField::LikesCount,
            SortArg::Comments => SortField::CommentsCount,
            SortArg::Title => SortField::Title,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for SortOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Asc => SortOrder::Asc,
            OrderArg::Desc => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Регистрация пользователя.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Повтор пароля; по умолчанию совпадает с `--password`.
        #[arg(long)]
        password_confirmation: Option<String>,
    },
    /// Вход пользователя.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Выход и очистка сохранённой сессии.
    Logout,
    /// Текущий пользователь.
    Whoami,
    /// Лента постов.
    List {
        /// Сколько страниц загрузить.
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Загрузить все страницы.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        per_page: Option<u32>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_enum)]
        sort_by: Option<SortArg>,
        #[arg(long, value_enum, default_value_t = OrderArg::Desc)]
        order: OrderArg,
    },
    /// Получение поста по id.
    Get {
        #[arg(long)]
        id: i64,
    },
    /// Создание поста (требует входа).
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        category: String,
        /// Путь к изображению.
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Обновление поста (требует входа).
    ///
    /// Не указанные поля берутся из текущей версии поста.
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Удаление поста (требует входа).
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Популярные посты.
    Trending,
    /// Избранные посты.
    Featured,
    /// Переключить отметку «избранное» (администратор).
    Feature {
        #[arg(long)]
        id: i64,
    },
    /// Комментарии поста.
    Comments {
        #[arg(long)]
        post_id: i64,
        /// Загрузить все страницы.
        #[arg(long)]
        all: bool,
    },
    /// Добавить комментарий.
    Comment {
        #[arg(long)]
        post_id: i64,
        #[arg(long)]
        content: String,
    },
    /// Изменить комментарий.
    EditComment {
        #[arg(long)]
        post_id: i64,
        #[arg(long)]
        comment_id: i64,
        #[arg(long)]
        content: String,
    },
    /// Удалить комментарий.
    DeleteComment {
        #[arg(long)]
        post_id: i64,
        #[arg(long)]
        comment_id: i64,
    },
    /// Поставить или снять лайк.
    Like {
        #[arg(long)]
        post_id: i64,
    },
    /// Статистика личного кабинета или админской панели.
    Dashboard {
        #[arg(long)]
        admin: bool,
    },
}

impl Command {
    fn per_page_override(&self) -> Option<u32> {
        match self {
            Self::List { per_page, .. } => per_page.filter(|value| *value > 0),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Ошибка: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    init_logging(&settings.log_level)?;

    let mut config = settings.client_config();
    if let Some(server) = cli.server {
        config.base_url = normalize_server(server);
    }
    if let Some(per_page) = cli.command.per_page_override() {
        config.default_per_page = per_page;
    }
    let session_file = cli.session_file.unwrap_or(settings.session_file);
    debug!(path = %session_file.display(), "using session file");

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(session_file));
    let client = QuillClient::new(config, AuthContext::new(store)).map_err(map_client_error)?;

    let result = execute(&client, cli.command).await;
    settle_session(&client, &result);
    result.map_err(map_client_error)
}

/// После 401 сессия и cookie стираются, иначе свежие cookie сохраняются.
fn settle_session(client: &QuillClient, result: &ClientResult<()>) {
    match result {
        Err(err) if err.is_auth_failure() => {
            warn!("server rejected the session, logging out");
            if let Err(err) = client.forget_session() {
                warn!(error = %err, "failed to clear stored session");
            }
        }
        _ if client.session().is_authenticated() => {
            if let Err(err) = client.persist_cookies() {
                warn!(error = %err, "failed to persist cookies");
            }
        }
        _ => {}
    }
}

async fn execute(client: &QuillClient, command: Command) -> ClientResult<()> {
    match command {
        Command::Register {
            name,
            email,
            password,
            password_confirmation,
        } => {
            let confirmation = password_confirmation.unwrap_or_else(|| password.clone());
            let registration = Registration::new(name, email, password, confirmation)?;
            let user = client.register(&registration).await?;
            print_user("Регистрация успешна", &user);
        }
        Command::Login { email, password } => {
            let credentials = Credentials::new(email, password)?;
            let user = client.login(&credentials).await?;
            print_user("Вход выполнен", &user);
        }
        Command::Logout => {
            client.logout().await?;
            println!("Вы вышли");
        }
        Command::Whoami => match client.session().current_user() {
            Some(user) => print_user("Текущий пользователь", &user),
            None => println!("Вы не вошли"),
        },
        Command::List {
            pages,
            all,
            category,
            sort_by,
            order,
            ..
        } => {
            let filter = FeedFilter {
                category,
                sort_by: sort_by.map(SortField::from),
                sort_order: order.into(),
            };
            let feed = client.posts_feed(filter);
            feed.refresh().await?;
            if all {
                feed.load_all().await?;
            } else {
                for _ in 1..pages {
                    if !matches!(feed.load_more().await?, LoadOutcome::Loaded { .. }) {
                        break;
                    }
                }
            }
            print_feed(&feed);
        }
        Command::Get { id } => {
            let post = client.get_post(id).await?;
            print_post("Пост", &post);
        }
        Command::Create {
            title,
            content,
            category,
            image,
        } => {
            let draft = PostDraft::new(title, content, category, image)?;
            let post = client.create_post(&draft).await?;
            print_post("Пост создан", &post);
        }
        Command::Update {
            id,
            title,
            content,
            category,
            image,
        } => {
            // Не переданные поля берём из текущей версии поста.
            let (title, content, category) = match (title, content, category) {
                (Some(title), Some(content), Some(category)) => (title, content, category),
                (title, content, category) => {
                    let current = client.get_post(id).await?;
                    (
                        title.unwrap_or(current.title),
                        content.unwrap_or(current.content),
                        category.unwrap_or(current.category),
                    )
                }
            };
            let draft = PostDraft::new(title, content, category, image)?;
            let post = client.update_post(id, &draft).await?;
            print_post("Пост обновлён", &post);
        }
        Command::Delete { id } => {
            client.delete_post(id).await?;
            println!("Пост удалён: id={id}");
        }
        Command::Trending => {
            let posts = client.trending_posts().await?;
            print_posts("Популярные посты", &posts);
        }
        Command::Featured => {
            let posts = client.featured_posts().await?;
            print_posts("Избранные посты", &posts);
        }
        Command::Feature { id } => {
            let post = client.toggle_featured(id).await?;
            println!("Пост id={} избранный: {}", post.id, post.is_featured);
        }
        Command::Comments { post_id, all } => {
            let thread = client.comment_thread(post_id);
            thread.load().await?;
            if all {
                thread.feed().load_all().await?;
            }
            print_comments(&thread.comments(), thread.feed());
        }
        Command::Comment { post_id, content } => {
            let outcome = client.comment_thread(post_id).submit(&content).await?;
            print_mutation("Комментарий добавлен", outcome);
        }
        Command::EditComment {
            post_id,
            comment_id,
            content,
        } => {
            let outcome = client
                .comment_thread(post_id)
                .edit(comment_id, &content)
                .await?;
            print_mutation("Комментарий изменён", outcome);
        }
        Command::DeleteComment {
            post_id,
            comment_id,
        } => {
            client.comment_thread(post_id).delete(comment_id).await?;
            println!("Комментарий удалён: id={comment_id}");
        }
        Command::Like { post_id } => {
            let current = client.like_status(post_id).await?;
            match client.like_toggle(post_id, current).toggle().await? {
                ToggleOutcome::Settled(state) => {
                    println!("liked: {}, лайков: {}", state.liked, state.like_count);
                }
                ToggleOutcome::Busy => println!("Запрос уже выполняется"),
            }
        }
        Command::Dashboard { admin: true } => {
            let stats = client.admin_dashboard().await?;
            print_admin_stats(&stats);
        }
        Command::Dashboard { admin: false } => {
            let stats = client.user_dashboard().await?;
            print_user_stats(&stats);
        }
    }

    Ok(())
}

fn normalize_server(server: String) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        return server;
    }

    format!("http://{server}")
}

fn map_client_error(err: ClientError) -> anyhow::Error {
    let message = match err {
        ClientError::Unauthorized => {
            "сессия недействительна: выполните `quill-cli login ...` ещё раз".to_string()
        }
        ClientError::NotAuthenticated => {
            "требуется вход: выполните `quill-cli login ...` или `quill-cli register ...`"
                .to_string()
        }
        ClientError::Forbidden => "недостаточно прав".to_string(),
        ClientError::NotFound => "ресурс не найден".to_string(),
        ClientError::Validation { field, message } => format!("поле {field}: {message}"),
        ClientError::CsrfMismatch => "CSRF-токен отклонён, повторите команду".to_string(),
        ClientError::Timeout => "сервер не ответил вовремя".to_string(),
        ClientError::Http(err) => format!("ошибка HTTP: {err}"),
        other => format!("некорректный запрос: {}", other.display_message()),
    };
    anyhow::anyhow!(message)
}

fn print_user(title: &str, user: &User) {
    println!("{title}");
    println!("  id: {}", user.id);
    println!("  name: {}", user.name);
    println!("  email: {}", user.email);
    println!("  admin: {}", user.is_admin());
}

fn print_post(title: &str, post: &Post) {
    println!("{title}");
    println!("id: {}", post.id);
    println!("title: {}", post.title);
    println!("category: {}", post.category);
    println!("content: {}", post.content);
    if let Some(image) = &post.image {
        println!("image: {image}");
    }
    println!(
        "views: {}, likes: {}, comments: {}, featured: {}",
        post.views, post.likes_count, post.comments_count, post.is_featured
    );
    if let Some(author) = &post.user {
        println!("author: {} (id={})", author.name, author.id);
    }
    println!("created_at: {}", post.created_at);
}

fn post_line(post: &Post) -> String {
    let featured = if post.is_featured { " *" } else { "" };
    format!(
        "- [{}] {}{} ({}, likes={})",
        post.id, post.title, featured, post.category, post.likes_count
    )
}

fn print_posts(title: &str, posts: &[Post]) {
    println!("{title}: {}", posts.len());
    for post in posts {
        println!("{}", post_line(post));
    }
}

fn print_feed(feed: &FeedLoader<Post>) {
    match feed.cursor() {
        Some(cursor) => println!(
            "Постов: {} из {} (страница {}/{})",
            feed.len(),
            cursor.total(),
            cursor.current_page(),
            cursor.last_page()
        ),
        None => println!("Постов: 0"),
    }
    feed.with_items(|posts| {
        for post in posts {
            println!("{}", post_line(post));
        }
    });
}

fn comment_line(comment: &Comment) -> String {
    let author = comment
        .user
        .as_ref()
        .map_or_else(|| format!("user_id={}", comment.user_id), |user| user.name.clone());
    format!("- [{}] {}: {}", comment.id, author, comment.content)
}

fn print_comments(comments: &[Comment], feed: &FeedLoader<Comment>) {
    let total = feed.cursor().map_or(0, |cursor| cursor.total());
    println!("Комментариев: {} из {}", comments.len(), total);
    for comment in comments {
        println!("{}", comment_line(comment));
    }
}

fn print_mutation(title: &str, outcome: MutationOutcome<Comment>) {
    match outcome {
        MutationOutcome::Applied(comment) => {
            println!("{title}");
            println!("{}", comment_line(&comment));
        }
        MutationOutcome::Busy => println!("Запрос уже выполняется"),
    }
}

fn print_admin_stats(stats: &AdminDashboard) {
    println!("Админская панель");
    println!("users: {}", stats.total_users);
    println!("posts: {}", stats.total_posts);
    println!("comments: {}", stats.total_comments);
    println!("likes: {}", stats.total_likes);
    println!("views: {}", stats.total_views);
    print_posts("Последние посты", &stats.recent_posts);
}

fn print_user_stats(stats: &UserDashboard) {
    println!("Личный кабинет");
    println!("posts: {}", stats.total_posts);
    println!("comments: {}", stats.total_comments);
    println!("likes: {}", stats.total_likes);
    println!("views: {}", stats.total_views);
    print_posts("Последние посты", &stats.recent_posts);
}

use rand::{distributions::Alphanumeric, Rng};

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// 从标题生成博客 id：slug + 随机后缀
pub fn blog_id(title: &str) -> String {
    let mut base = slug::slugify(title);
    if base.len() > 80 {
        base.truncate(80);
        base = base.trim_end_matches('-').to_string();
    }
    if base.is_empty() {
        base = "untitled".to_string();
    }
    format!("{}-{}", base, random_suffix(6))
}

/// 注册时生成的用户名：邮箱本地部分 + 5 位随机后缀
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut base = slug::slugify(local).replace('-', "_");
    if base.is_empty() {
        base = "user".to_string();
    }
    format!("{}{}", base, random_suffix(5))
}

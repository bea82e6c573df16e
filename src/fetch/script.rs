//! SteamCMD argument lists and runscripts.

use std::fmt;

/// Login used for a fetch run. No username means an anonymous login.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: Some(username.into()),
            password,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.as_deref().is_none_or(|u| u.trim().is_empty())
    }

    /// Words that follow `login`: `anonymous`, `<user>` or `<user> <password>`.
    fn login_words(&self) -> Vec<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !self.is_anonymous() && !pass.is_empty() => {
                vec![user.clone(), pass.clone()]
            }
            (Some(user), _) if !self.is_anonymous() => vec![user.clone()],
            _ => vec!["anonymous".to_string()],
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

pub fn login_args(creds: &Credentials) -> Vec<String> {
    let mut args = vec!["+login".to_string()];
    args.extend(creds.login_words());
    args
}

/// `+login … +force_install_dir <dir> +app_update <id> [validate] +quit`
pub fn install_args(creds: &Credentials, install_dir: &str, app_id: u32, validate: bool) -> Vec<String> {
    let mut args = login_args(creds);
    args.push("+force_install_dir".to_string());
    args.push(install_dir.to_string());
    args.push("+app_update".to_string());
    args.push(app_id.to_string());
    if validate {
        args.push("validate".to_string());
    }
    args.push("+quit".to_string());
    args
}

/// `+login … +quit`
pub fn ping_args(creds: &Credentials) -> Vec<String> {
    let mut args = login_args(creds);
    args.push("+quit".to_string());
    args
}

pub fn runscript_args(script_path: &str) -> Vec<String> {
    vec!["+runscript".to_string(), script_path.to_string()]
}

/// Non-interactive runscript that stops at the first failed command.
pub fn build_runscript(creds: &Credentials, install_dir: &str, app_id: u32, validate: bool) -> String {
    let validate = if validate { " validate" } else { "" };
    format!(
        "@ShutdownOnFailedCommand 1\n\
         @NoPromptForPassword 1\n\
         force_install_dir {}\n\
         login {}\n\
         app_update {}{}\n\
         quit\n",
        install_dir,
        creds.login_words().join(" "),
        app_id,
        validate
    )
}

/// Copy of `args` with the password after `+login <user>` masked.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = args.to_vec();
    if let Some(pos) = out.iter().position(|a| a == "+login") {
        let pass = pos + 2;
        if pass < out.len() && !out[pass].starts_with('+') {
            out[pass] = "***".to_string();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_args_cover_all_credential_shapes() {
        assert_eq!(login_args(&Credentials::anonymous()), vec!["+login", "anonymous"]);
        assert_eq!(
            login_args(&Credentials::user("op", None)),
            vec!["+login", "op"]
        );
        assert_eq!(
            login_args(&Credentials::user("op", Some("pw".into()))),
            vec!["+login", "op", "pw"]
        );
        assert_eq!(
            login_args(&Credentials::user("  ", Some("pw".into()))),
            vec!["+login", "anonymous"]
        );
    }

    #[test]
    fn install_args_order() {
        let args = install_args(&Credentials::anonymous(), "/srv/game", 1874900, true);
        assert_eq!(
            args,
            vec![
                "+login",
                "anonymous",
                "+force_install_dir",
                "/srv/game",
                "+app_update",
                "1874900",
                "validate",
                "+quit"
            ]
        );
        let no_validate = install_args(&Credentials::anonymous(), "/srv/game", 1874900, false);
        assert!(!no_validate.contains(&"validate".to_string()));
    }

    #[test]
    fn runscript_is_non_interactive() {
        let script = build_runscript(&Credentials::anonymous(), "/data", 1874900, true);
        assert_eq!(
            script,
            "@ShutdownOnFailedCommand 1\n@NoPromptForPassword 1\nforce_install_dir /data\nlogin anonymous\napp_update 1874900 validate\nquit\n"
        );
    }

    #[test]
    fn runscript_without_validate() {
        let script = build_runscript(&Credentials::user("op", None), "/data", 42, false);
        assert!(script.contains("login op\n"));
        assert!(script.contains("app_update 42\n"));
    }

    #[test]
    fn redact_masks_only_the_password() {
        let args = login_args(&Credentials::user("op", Some("hunter2".into())));
        assert_eq!(redact_args(&args), vec!["+login", "op", "***"]);

        let anon = install_args(&Credentials::anonymous(), "/d", 1, false);
        assert_eq!(redact_args(&anon), anon);

        let user_only = ping_args(&Credentials::user("op", None));
        assert_eq!(redact_args(&user_only), vec!["+login", "op", "+quit"]);
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::user("op", Some("hunter2".into()));
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}

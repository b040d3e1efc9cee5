//! Application routes and their access requirements

use std::fmt;

/// A client-side page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Bands,
    BandDetail(String),
    Rehearsals,
    RehearsalDetail(String),
    Songs,
    Setlists,
    Settings,
    NotFound,
}

impl Route {
    /// Match a path; unknown paths map to [`Route::NotFound`]
    pub fn parse(path: &str) -> Self {
        let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Self::Dashboard,
            ["login"] => Self::Login,
            ["register"] => Self::Register,
            ["bands"] => Self::Bands,
            ["bands", id] => Self::BandDetail((*id).to_string()),
            ["rehearsals"] => Self::Rehearsals,
            ["rehearsals", id] => Self::RehearsalDetail((*id).to_string()),
            ["songs"] => Self::Songs,
            ["setlists"] => Self::Setlists,
            ["settings"] => Self::Settings,
            _ => Self::NotFound,
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Login | Self::Register | Self::NotFound)
    }

    pub fn path(&self) -> String {
        match self {
            Self::Login => "/login".to_string(),
            Self::Register => "/register".to_string(),
            Self::Dashboard => "/".to_string(),
            Self::Bands => "/bands".to_string(),
            Self::BandDetail(id) => format!("/bands/{id}"),
            Self::Rehearsals => "/rehearsals".to_string(),
            Self::RehearsalDetail(id) => format!("/rehearsals/{id}"),
            Self::Songs => "/songs".to_string(),
            Self::Setlists => "/setlists".to_string(),
            Self::Settings => "/settings".to_string(),
            Self::NotFound => "*".to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

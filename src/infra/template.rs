use askama::Template;

use crate::application::collaborators::{EntryModule, EntryTemplate, TemplateError};

/// One branch of the generated `renderView` dispatch.
struct ViewCase<'a> {
    label: &'a str,
    module: &'a str,
}

#[derive(Template)]
#[template(path = "Main.elm.txt", escape = "none")]
struct MainModuleTemplate<'a> {
    imports: Vec<&'a str>,
    cases: Vec<ViewCase<'a>>,
}

/// Entry module for the compiler, rendered from `templates/Main.elm.txt`.
///
/// Every discovered module is imported and answers to its full name; modules
/// with an alias answer to the alias as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct AskamaEntryTemplate;

impl EntryTemplate for AskamaEntryTemplate {
    fn render(&self, modules: &[EntryModule]) -> Result<String, TemplateError> {
        let imports = modules.iter().map(|module| module.name.as_str()).collect();
        let cases = modules
            .iter()
            .flat_map(|module| {
                let full = ViewCase {
                    label: module.name.as_str(),
                    module: module.name.as_str(),
                };
                let alias = module.alias.as_deref().map(|alias| ViewCase {
                    label: alias,
                    module: module.name.as_str(),
                });
                std::iter::once(full).chain(alias)
            })
            .collect();

        MainModuleTemplate { imports, cases }
            .render()
            .map_err(|err| TemplateError::Render(err.to_string()))
    }
}

//! Lawyer extraction from free text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::Advogado;
use crate::utils::limpar_texto;

const NOME: &str = r"[\p{Lu}][\p{L}'.]*(?:\s+(?:(?:d[aeo]s?|e)\s+)?[\p{Lu}][\p{L}'.]*)+";

/// `Nome (OAB/UF numero)`
static OAB_ENTRE_PARENTESES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?P<nome>{NOME})\s*\(\s*OAB\s*[/:\-]?\s*(?P<uf>[A-Z]{{2}})\s*[/:\-]?\s*(?:n[º°o.]*\s*)?(?P<numero>\d[\d.]*[A-Z]?)\s*\)"
    ))
    .expect("invalid parenthesised OAB regex")
});

/// `Nome OAB UF numero`, `Nome - OAB/UF numero`
static OAB_EM_LINHA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?P<nome>{NOME})\s*[,\-–]?\s*OAB\s*[/:\-]?\s*(?P<uf>[A-Z]{{2}})\s*[/:\-]?\s*(?:n[º°o.]*\s*)?(?P<numero>\d[\d.]*[A-Z]?)"
    ))
    .expect("invalid inline OAB regex")
});

/// `Nome OAB numero/UF`
static OAB_NUMERO_UF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?P<nome>{NOME})\s*[,\-–]?\s*\(?\s*OAB\s*[:º°.]*\s*(?P<numero>\d[\d.]*[A-Z]?)\s*/\s*(?P<uf>[A-Z]{{2}})\b\)?"
    ))
    .expect("invalid OAB number/UF regex")
});

/// Every lawyer mentioned in `texto`. Duplicates are left to
/// [`crate::domain::ProcessoJudicialBuilder::build`].
pub fn extrair_advogados(texto: &str) -> Vec<Advogado> {
    let texto = limpar_texto(texto);
    let mut encontrados = Vec::new();

    for regex in [&*OAB_ENTRE_PARENTESES, &*OAB_EM_LINHA, &*OAB_NUMERO_UF] {
        for caps in regex.captures_iter(&texto) {
            let nome = caps["nome"].trim().trim_end_matches(['-', ',']).trim();
            if nome.is_empty() {
                continue;
            }
            let numero: String = caps["numero"].chars().filter(|c| *c != '.').collect();
            encontrados.push(Advogado::new(nome).with_oab(&caps["uf"], numero));
        }
    }

    encontrados
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parenthesised_form() {
        let found = extrair_advogados("Advogado: MARIA DA SILVA (OAB/GO 12.345)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nome, "MARIA DA SILVA");
        assert_eq!(found[0].oab_estado.as_deref(), Some("GO"));
        assert_eq!(found[0].oab_numero.as_deref(), Some("12345"));
        assert_eq!(found[0].to_string(), "MARIA DA SILVA (OAB/GO 12345)");
    }

    #[test]
    fn parses_inline_forms() {
        let found = extrair_advogados("Advogado(a): João Pereira OAB SP 98765 e outros");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nome, "João Pereira");
        assert_eq!(found[0].oab_estado.as_deref(), Some("SP"));

        let found = extrair_advogados("Ana Costa OAB 4321/DF");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].oab_estado.as_deref(), Some("DF"));
        assert_eq!(found[0].oab_numero.as_deref(), Some("4321"));
    }

    #[test]
    fn ignores_text_without_oab() {
        assert!(extrair_advogados("Autor: José Santos").is_empty());
    }
}

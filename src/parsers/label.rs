//! Layout-agnostic parser driven by `label: value` pairs.
//!
//! Reads table rows, definition lists, `<label>` elements and
//! `Label: value` paragraphs, then maps well-known labels onto the record.
//! Dated table rows become movements; tables headed by intimation columns
//! become intimations.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::ProcessoParser;
use super::advogados::extrair_advogados;
use super::classifier::PageClassifier;
use crate::domain::{
    Documento, DocumentoParte, Intimacao, Movimentacao, Parte, ProcessoJudicial, StatusProcesso,
    TipoParte,
};
use crate::error::{ScraperError, ScraperResult};
use crate::tribunais::Tribunal;
use crate::utils::{
    dobrar_texto, limpar_texto, parsear_data, parsear_valor_monetario, somente_digitos,
};

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("invalid row selector"));
static TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("invalid table selector"));
static HEADER_CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th").expect("invalid header cell selector"));
static DL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("dl").expect("invalid dl selector"));
static LABEL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("label").expect("invalid label selector"));
static LINE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, li").expect("invalid line selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("invalid link selector"));

static INLINE_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:]{2,40}):\s*(.+)$").expect("invalid inline pair regex"));
static INLINE_MOVEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}/\d{2}/\d{2,4})(?:\s+(?:às\s+)?\d{2}:\d{2}(?::\d{2})?)?\s*[-–]\s*(.+)$")
        .expect("invalid inline movement regex")
});
static DOCUMENT_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(pdf|docx?|odt|rtf|p7s)(?:[?#&]|$)").expect("invalid document extension regex")
});
static DOCUMENT_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)download|documento|arquivo|visualizar|anexo").expect("invalid document link regex")
});
static CNPJ_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}").expect("invalid CNPJ regex")
});
static CPF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{3}\.?\d{3}\.?\d{3}-?\d{2}").expect("invalid CPF regex"));
static NAME_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(cpf|cnpj|advogad[oa]s?|procurador[a]?|representante)\b|\(")
        .expect("invalid party name regex")
});
static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("invalid number regex"));

const CLASSE: &[&str] = &["classe"];
const COMARCA: &[&str] = &["comarca", "foro", "jurisdicao"];
const VARA: &[&str] = &["vara", "orgao julgador", "juizo", "serventia"];
const VALOR: &[&str] = &["valor da causa", "valor da acao", "valor"];
const DISTRIBUICAO: &[&str] = &[
    "data de distribuicao",
    "data da distribuicao",
    "distribuicao",
    "distribuido em",
    "data de autuacao",
    "autuacao",
    "data do ajuizamento",
];
const SITUACAO: &[&str] = &["situacao", "status"];

const AUTOR: &[&str] = &[
    "autor", "requerent", "reqte", "exequent", "exeqte", "reclamant", "impetrant",
    "apelant", "agravant", "embargant", "promovent", "demandant", "querelant", "polo ativo",
];
const REU: &[&str] = &[
    "reu", "re", "requerid", "reqdo", "reqda", "executad", "exectdo", "reclamad", "impetrad",
    "apelad", "agravad", "embargad", "promovid", "demandad", "querelad", "polo passivo",
];
const TERCEIRO: &[&str] = &[
    "terceir", "interessad", "assistent", "litisconsort", "custos legis", "fiscal da lei",
];

/// One `label -> value` pair; the label is folded and stripped of `:`.
#[derive(Debug, Clone)]
struct Pair {
    label: String,
    value: String,
}

impl Pair {
    fn new(label: &str, value: &str) -> Option<Self> {
        let label = dobrar_texto(&limpar_texto(label))
            .trim_end_matches(':')
            .trim()
            .to_string();
        let value = limpar_texto(value);
        (!label.is_empty() && !value.is_empty()).then_some(Self { label, value })
    }
}

fn label_matches(label: &str, key: &str) -> bool {
    label == key
        || label.starts_with(&format!("{key} "))
        || (key.len() >= 5 && label.starts_with(key))
}

fn text_of(element: &ElementRef<'_>) -> String {
    limpar_texto(&element.text().collect::<Vec<_>>().join(" "))
}

fn nearest_table<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "table")
}

fn celulas<'a>(row: &ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .collect()
}

fn tipo_parte(label: &str) -> Option<TipoParte> {
    let matches = |keys: &[&str]| keys.iter().any(|key| label_matches(label, key));
    if matches(AUTOR) {
        Some(TipoParte::Autor)
    } else if matches(REU) {
        Some(TipoParte::Reu)
    } else if matches(TERCEIRO) {
        Some(TipoParte::Terceiro)
    } else {
        None
    }
}

fn parte_from(tipo: TipoParte, value: &str) -> Option<Parte> {
    let end = NAME_END.find(value).map(|m| m.start()).unwrap_or(value.len());
    let nome = value[..end].trim().trim_end_matches([':', '-', ',', '–']).trim();
    if nome.is_empty() {
        return None;
    }
    let documento = CNPJ_PATTERN
        .find_iter(value)
        .chain(CPF_PATTERN.find_iter(value))
        .find_map(|m| DocumentoParte::identificar(m.as_str()));
    Some(Parte::new(tipo, nome).with_documento(documento))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntimacaoColuna {
    Data,
    Destinatario,
    Descricao,
    Prazo,
    Outra,
}

fn coluna(header: &str) -> IntimacaoColuna {
    let header = dobrar_texto(header);
    if header.contains("prazo") {
        IntimacaoColuna::Prazo
    } else if header.contains("data") {
        IntimacaoColuna::Data
    } else if header.contains("destinat") || header.contains("intimad") || header.contains("parte")
    {
        IntimacaoColuna::Destinatario
    } else if header.contains("descri") || header.contains("ato") || header.contains("teor") {
        IntimacaoColuna::Descricao
    } else {
        IntimacaoColuna::Outra
    }
}

/// Everything collected from one document before the record is built.
#[derive(Debug, Default)]
struct Extraction {
    pairs: Vec<Pair>,
    movimentacoes: Vec<Movimentacao>,
    intimacoes: Vec<Intimacao>,
    documentos: Vec<Documento>,
    texto: String,
}

impl Extraction {
    fn campo(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.pairs
                .iter()
                .find(|pair| label_matches(&pair.label, key))
                .map(|pair| pair.value.as_str())
        })
    }
}

/// Default parser for portals without a dedicated layout plugin.
#[derive(Debug, Clone, Default)]
pub struct LabelParser {
    classifier: PageClassifier,
}

impl LabelParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn extract(&self, document: &Html, tribunal: &Tribunal) -> Extraction {
        let mut out = Extraction {
            texto: text_of(&document.root_element()),
            ..Default::default()
        };

        let intimation_tables = intimation_tables(document);
        let mut headers: Vec<(ElementRef<'_>, Vec<IntimacaoColuna>)> = Vec::new();

        for row in document.select(&ROW_SELECTOR) {
            let cells = celulas(&row);
            let texts: Vec<String> = cells.iter().map(text_of).collect();

            if let Some(table) = nearest_table(&row).filter(|t| intimation_tables.contains(t)) {
                let known = headers.iter().find(|(t, _)| *t == table).map(|(_, cols)| cols);
                let is_header = cells.iter().all(|cell| cell.value().name() == "th");
                if is_header {
                    if known.is_none() {
                        headers.push((table, texts.iter().map(|text| coluna(text)).collect()));
                    }
                } else if let Some(intimacao) = intimacao_from(&texts, known) {
                    out.intimacoes.push(intimacao);
                }
                continue;
            }

            if let Some(movimentacao) = movimentacao_from(&texts) {
                out.movimentacoes.push(movimentacao);
                continue;
            }

            let mut i = 0;
            while i + 1 < texts.len() {
                let label = &texts[i];
                let is_label = label.ends_with(':')
                    || (i == 0 && texts.len() == 2 && label.chars().count() <= 40);
                if is_label {
                    out.pairs.extend(Pair::new(label, &texts[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }

        for dl in document.select(&DL_SELECTOR) {
            let mut pending: Option<String> = None;
            for child in dl.children().filter_map(ElementRef::wrap) {
                match child.value().name() {
                    "dt" => pending = Some(text_of(&child)),
                    "dd" => {
                        if let Some(label) = pending.take() {
                            out.pairs.extend(Pair::new(&label, &text_of(&child)));
                        }
                    }
                    _ => {}
                }
            }
        }

        for label in document.select(&LABEL_SELECTOR) {
            let sibling = label
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .next()
                .or_else(|| {
                    label
                        .parent()
                        .and_then(ElementRef::wrap)
                        .and_then(|parent| parent.next_siblings().filter_map(ElementRef::wrap).next())
                });
            if let Some(value) = sibling {
                out.pairs.extend(Pair::new(&text_of(&label), &text_of(&value)));
            }
        }

        for line in document.select(&LINE_SELECTOR) {
            let text = text_of(&line);
            if let Some(caps) = INLINE_MOVEMENT.captures(&text) {
                out.movimentacoes.push(Movimentacao {
                    data: parsear_data(&caps[1]),
                    descricao: caps[2].trim().to_string(),
                });
            } else if let Some(caps) = INLINE_PAIR.captures(&text) {
                out.pairs.extend(Pair::new(&caps[1], &caps[2]));
            }
        }

        let mut seen_links = HashSet::new();
        for link in document.select(&LINK_SELECTOR) {
            let Some(href) = link.value().attr("href").map(str::trim) else {
                continue;
            };
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            let extensao = DOCUMENT_EXTENSION
                .captures(href)
                .map(|caps| caps[1].to_ascii_uppercase());
            if extensao.is_none() && !DOCUMENT_KEYWORD.is_match(href) {
                continue;
            }
            let url = tribunal
                .base_url
                .join(href)
                .map(String::from)
                .unwrap_or_else(|_| href.to_string());
            if !seen_links.insert(url.clone()) {
                continue;
            }
            let tipo = extensao.unwrap_or_else(|| "DOCUMENTO".to_string());
            let mut nome = text_of(&link);
            if nome.is_empty() {
                nome = href
                    .rsplit('/')
                    .next()
                    .unwrap_or(href)
                    .split(['?', '#'])
                    .next()
                    .unwrap_or(href)
                    .to_string();
            }
            out.documentos.push(Documento::new(nome, tipo, url));
        }

        out
    }
}

fn intimation_tables(document: &Html) -> Vec<ElementRef<'_>> {
    let mut tables = Vec::new();
    for table in document.select(&TABLE_SELECTOR) {
        let marked = table
            .value()
            .id()
            .into_iter()
            .chain(table.value().classes())
            .any(|name| dobrar_texto(name).contains("intima"));
        if marked {
            tables.push(table);
        }
    }
    for header in document.select(&HEADER_CELL_SELECTOR) {
        let text = dobrar_texto(&text_of(&header));
        if (text.contains("destinatario") || text.contains("intimac"))
            && let Some(table) = nearest_table(&header)
            && !tables.contains(&table)
        {
            tables.push(table);
        }
    }
    tables
}

fn movimentacao_from(texts: &[String]) -> Option<Movimentacao> {
    match texts {
        [single] => INLINE_MOVEMENT.captures(single).map(|caps| Movimentacao {
            data: parsear_data(&caps[1]),
            descricao: caps[2].trim().to_string(),
        }),
        [first, rest @ ..] if first.chars().count() <= 25 => {
            let data = parsear_data(first)?;
            let descricao = rest
                .iter()
                .filter(|text| !text.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            (!descricao.is_empty()).then_some(Movimentacao {
                data: Some(data),
                descricao,
            })
        }
        _ => None,
    }
}

fn intimacao_from(texts: &[String], header: Option<&Vec<IntimacaoColuna>>) -> Option<Intimacao> {
    if texts.iter().all(String::is_empty) {
        return None;
    }
    let positional = [
        IntimacaoColuna::Data,
        IntimacaoColuna::Destinatario,
        IntimacaoColuna::Descricao,
        IntimacaoColuna::Prazo,
    ];
    let mut intimacao = Intimacao {
        data: None,
        destinatario: String::new(),
        descricao: String::new(),
        prazo_dias: None,
    };
    for (idx, text) in texts.iter().enumerate() {
        let coluna = match header {
            Some(columns) => columns.get(idx).copied().unwrap_or(IntimacaoColuna::Outra),
            None => positional.get(idx).copied().unwrap_or(IntimacaoColuna::Outra),
        };
        match coluna {
            IntimacaoColuna::Data => intimacao.data = parsear_data(text),
            IntimacaoColuna::Destinatario => intimacao.destinatario = text.clone(),
            IntimacaoColuna::Descricao => intimacao.descricao = text.clone(),
            IntimacaoColuna::Prazo => {
                intimacao.prazo_dias = FIRST_NUMBER
                    .find(text)
                    .and_then(|m| m.as_str().parse().ok())
            }
            IntimacaoColuna::Outra => {}
        }
    }
    // Placeholder rows ("nenhum registro encontrado") fill no column.
    let vazia = intimacao.data.is_none()
        && intimacao.destinatario.is_empty()
        && intimacao.descricao.is_empty();
    (!vazia).then_some(intimacao)
}

impl ProcessoParser for LabelParser {
    fn parse(
        &self,
        html: &str,
        numero: &str,
        tribunal: &Tribunal,
    ) -> ScraperResult<ProcessoJudicial> {
        let sealed = self.classifier.is_sealed(html);
        let extraction = {
            let document = Html::parse_document(html);
            self.extract(&document, tribunal)
        };

        let mut builder = ProcessoJudicial::builder(numero, &tribunal.codigo, tribunal.sistema)
            .segredo_justica(sealed)
            .classe(extraction.campo(CLASSE).map(str::to_string))
            .comarca(extraction.campo(COMARCA).map(str::to_string))
            .vara(extraction.campo(VARA).map(str::to_string))
            .valor_causa(extraction.campo(VALOR).and_then(parsear_valor_monetario))
            .data_distribuicao(extraction.campo(DISTRIBUICAO).and_then(parsear_data));

        if let Some(situacao) = extraction.campo(SITUACAO) {
            builder = builder.status(StatusProcesso::inferir(&dobrar_texto(situacao)));
        }

        let mut partes = 0;
        for pair in &extraction.pairs {
            if let Some(tipo) = tipo_parte(&pair.label)
                && let Some(parte) = parte_from(tipo, &pair.value)
            {
                builder = builder.parte(parte);
                partes += 1;
            }
        }

        for advogado in extrair_advogados(&extraction.texto) {
            builder = builder.advogado(advogado);
        }

        let recognised_fields = [CLASSE, COMARCA, VARA, VALOR, DISTRIBUICAO, SITUACAO]
            .iter()
            .any(|keys| extraction.campo(keys).is_some());
        let mentions_numero =
            somente_digitos(&extraction.texto).contains(&somente_digitos(numero));

        if !sealed
            && !recognised_fields
            && partes == 0
            && extraction.movimentacoes.is_empty()
            && !mentions_numero
        {
            let err = ScraperError::parse(
                format!("no process fields found for {numero} on {}", tribunal.codigo),
                html,
            );
            if let ScraperError::Parse { ref snippet, .. } = err {
                log::warn!("[{}] unrecognised page for {numero}: {snippet}", tribunal.codigo);
            }
            return Err(err);
        }

        for movimentacao in extraction.movimentacoes {
            builder = builder.movimentacao(movimentacao);
        }
        for documento in extraction.documentos {
            builder = builder.documento(documento);
        }
        for intimacao in extraction.intimacoes {
            builder = builder.intimacao(intimacao);
        }

        Ok(builder.build())
    }
}
